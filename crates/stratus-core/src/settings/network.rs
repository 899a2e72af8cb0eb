//! ネットワーク設定の読み込み

use stratus_config::{ConfigError, ConfigTree, Result};

const DEFAULT_CIDR: &str = "10.0.0.0/16";
const DEFAULT_MAX_AZS: usize = 2;

/// VPC 設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub cidr: String,
    pub subnet_cidrs: Vec<String>,
}

/// `network.*` を読み込む
///
/// `network.subnets` が無ければ `network.cidr` から /24 サブネットを `max_azs` 個導出する。
pub(crate) fn parse_network(tree: &ConfigTree) -> Result<NetworkSettings> {
    let cidr = tree.get_or("network.cidr", DEFAULT_CIDR.to_string())?;

    let mut explicit = tree.children("network.subnets");
    explicit.sort_by_key(|index| index.parse::<usize>().unwrap_or(usize::MAX));
    let subnet_cidrs = if explicit.is_empty() {
        let max_azs = tree.get_or("network.max_azs", DEFAULT_MAX_AZS)?;
        derive_subnets(&cidr, max_azs)?
    } else {
        explicit
            .iter()
            .map(|index| tree.require::<String>(&format!("network.subnets.{}", index)))
            .collect::<Result<Vec<_>>>()?
    };

    Ok(NetworkSettings { cidr, subnet_cidrs })
}

fn derive_subnets(cidr: &str, count: usize) -> Result<Vec<String>> {
    let invalid_cidr = || ConfigError::InvalidValue {
        key: "network.cidr".to_string(),
        expected: "/16 以下の IPv4 CIDR（それ以外は network.subnets を明示）".to_string(),
        found: cidr.to_string(),
    };

    if count == 0 || count > 256 {
        return Err(ConfigError::InvalidValue {
            key: "network.max_azs".to_string(),
            expected: "1〜256".to_string(),
            found: count.to_string(),
        });
    }

    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid_cidr)?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid_cidr())?;
    if prefix > 16 {
        return Err(invalid_cidr());
    }

    let octets: Vec<u8> = address
        .split('.')
        .map(|o| o.parse::<u8>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| invalid_cidr())?;
    if octets.len() != 4 {
        return Err(invalid_cidr());
    }

    Ok((0..count)
        .map(|i| format!("{}.{}.{}.0/24", octets[0], octets[1], i))
        .collect())
}
