//! DNS リソース

use super::reference::Reference;
use serde::{Deserialize, Serialize};

/// パブリックホストゾーン
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsZoneSpec {
    pub domain_name: String,
}

impl DnsZoneSpec {
    pub fn references(&self) -> Vec<&Reference> {
        Vec::new()
    }
}

/// ロードバランサーを指すエイリアス A レコード
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordSpec {
    /// レコード名（完全修飾）
    pub record_name: String,
    /// 登録先ホストゾーンID
    pub zone: Reference,
    /// エイリアス先の DNS 名
    pub target_dns_name: Reference,
    /// エイリアス先のホストゾーンID
    pub target_zone_id: Reference,
}

impl DnsRecordSpec {
    pub fn references(&self) -> Vec<&Reference> {
        vec![&self.zone, &self.target_dns_name, &self.target_zone_id]
    }
}
