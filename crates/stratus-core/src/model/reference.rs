//! ノード間参照
//!
//! ノードのプロパティは、先に構築されたノードの出力を名前で参照する。
//! 参照は apply 時に参照先ノードの出力で解決される。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// よく使う出力キー
pub mod outputs {
    /// プロバイダー側のリソースID
    pub const ID: &str = "id";
    /// ARN などの完全修飾ID
    pub const ARN: &str = "arn";
    /// サブネットID（カンマ区切り）
    pub const SUBNET_IDS: &str = "subnet_ids";
    /// データベースのエンドポイントアドレス
    pub const ENDPOINT_ADDRESS: &str = "endpoint_address";
    /// データベースのエンドポイントポート
    pub const ENDPOINT_PORT: &str = "endpoint_port";
    /// ホストゾーンID
    pub const ZONE_ID: &str = "zone_id";
    /// ネームサーバー（カンマ区切り）
    pub const NAME_SERVERS: &str = "name_servers";
    /// ロードバランサーの DNS 名
    pub const DNS_NAME: &str = "dns_name";
    /// ロードバランサーの正規ホストゾーンID（エイリアスレコード用）
    pub const CANONICAL_ZONE_ID: &str = "canonical_zone_id";
    /// ターゲットグループ ARN
    pub const TARGET_GROUP_ARN: &str = "target_group_arn";
    /// シークレットハンドル
    pub const SECRET: &str = "secret";
    /// レコードの完全修飾ドメイン名
    pub const FQDN: &str = "fqdn";
}

/// 他ノードの出力への参照
///
/// シリアライズ時は `${node.output}` 形式の文字列になる。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference {
    /// 参照先ノード名
    pub node: String,
    /// 参照先の出力キー
    pub output: String,
}

impl Reference {
    pub fn new(node: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.node, self.output)
    }
}

impl FromStr for Reference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| format!("参照は ${{node.output}} 形式で指定してください: {}", s))?;
        match inner.split_once('.') {
            Some((node, output)) if !node.is_empty() && !output.is_empty() => {
                Ok(Reference::new(node, output))
            }
            _ => Err(format!("不正な参照: {}", s)),
        }
    }
}

impl TryFrom<String> for Reference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.to_string()
    }
}

/// 文字列と参照を連結した値の断片
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

/// 参照を含みうる文字列値（例: `${database.endpoint_address}:${database.endpoint_port}`）
///
/// シリアライズ時は1つの文字列になる。リテラル中の `$` は `$$` にエスケープされる。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interpolated(pub Vec<Segment>);

impl Interpolated {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::default().push_text(text)
    }

    pub fn reference(reference: Reference) -> Self {
        Self(vec![Segment::Ref(reference)])
    }

    /// 文字列を連結（隣接する文字列断片は1つにまとめる）
    pub fn push_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            return self;
        }
        match self.0.last_mut() {
            Some(Segment::Text(last)) => last.push_str(&text),
            _ => self.0.push(Segment::Text(text)),
        }
        self
    }

    pub fn push_ref(mut self, reference: Reference) -> Self {
        self.0.push(Segment::Ref(reference));
        self
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.0.iter().filter_map(|s| match s {
            Segment::Ref(r) => Some(r),
            Segment::Text(_) => None,
        })
    }

    /// 参照を解決して文字列を組み立てる
    pub fn resolve<E>(
        &self,
        mut lookup: impl FnMut(&Reference) -> Result<String, E>,
    ) -> Result<String, E> {
        let mut out = String::new();
        for segment in &self.0 {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Ref(r) => out.push_str(&lookup(r)?),
            }
        }
        Ok(out)
    }
}

impl From<Interpolated> for String {
    fn from(value: Interpolated) -> Self {
        let mut out = String::new();
        for segment in &value.0 {
            match segment {
                Segment::Text(t) => out.push_str(&t.replace('$', "$$")),
                Segment::Ref(r) => out.push_str(&r.to_string()),
            }
        }
        out
    }
}

impl TryFrom<String> for Interpolated {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = value.as_str();

        while let Some(pos) = rest.find('$') {
            text.push_str(&rest[..pos]);
            rest = &rest[pos..];
            if let Some(after) = rest.strip_prefix("$$") {
                text.push('$');
                rest = after;
            } else if rest.starts_with("${") {
                let end = rest
                    .find('}')
                    .ok_or_else(|| format!("閉じていない参照: {}", value))?;
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Ref(rest[..=end].parse()?));
                rest = &rest[end + 1..];
            } else {
                text.push('$');
                rest = &rest[1..];
            }
        }
        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Interpolated(segments))
    }
}

impl fmt::Display for Interpolated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            match segment {
                Segment::Text(t) => f.write_str(t)?,
                Segment::Ref(r) => write!(f, "{}", r)?,
            }
        }
        Ok(())
    }
}
