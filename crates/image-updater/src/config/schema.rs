use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One entry of the rules file, as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryRuleConfig {
    #[serde(rename = "allowImageTag", default)]
    pub allow_image_tag: String,
    #[serde(rename = "denyImageTag", default)]
    pub deny_image_tag: String,
    #[serde(rename = "registryURI")]
    pub registry_uri: String,
    #[serde(rename = "gitHubRepository")]
    pub github_repository: String,
    pub region: String,
    #[serde(default, deserialize_with = "deserialize_account_map")]
    pub env: BTreeMap<String, String>,
}

/// Account ids are often written unquoted, which YAML reads as integers.
#[derive(Deserialize)]
#[serde(untagged)]
enum AccountKey {
    Text(String),
    Number(u64),
}

impl From<AccountKey> for String {
    fn from(key: AccountKey) -> Self {
        match key {
            AccountKey::Text(s) => s,
            AccountKey::Number(n) => format!("{:012}", n),
        }
    }
}

fn deserialize_account_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<(AccountKey, String)> = AccountEntries::deserialize(deserializer)?.0;
    Ok(raw.into_iter().map(|(k, v)| (String::from(k), v)).collect())
}

/// Map entries in document order, without requiring `Ord` on the key.
struct AccountEntries(Vec<(AccountKey, String)>);

impl<'de> Deserialize<'de> for AccountEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> serde::de::Visitor<'de> for EntriesVisitor {
            type Value = AccountEntries;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a mapping of account id to environment name")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(AccountEntries(Vec::new()))
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut map: A,
            ) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<AccountKey, String>()? {
                    entries.push(entry);
                }
                Ok(AccountEntries(entries))
            }
        }

        deserializer.deserialize_any(EntriesVisitor)
    }
}
