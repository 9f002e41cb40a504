use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::{Error, Result};
use crate::scanner::Pattern;

/// Where to take the final value from once a signature has matched
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum ScanResultType {
    /// Little-endian `i32` stored in the 4 bytes before the match
    ValueBeforeSig,
    /// Little-endian `i32` stored right after the end of the match
    ValueAfterSig,
    /// Absolute address of the first matched byte
    #[default]
    AddressStartOfSig,
    /// Little-endian `i32` stored at the first wildcard of the match
    ValueAtWildCard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub key: String,
    #[serde(alias = "value")]
    pub pattern: String,
    #[serde(default)]
    pub offset: i32,
    #[serde(default, alias = "type")]
    pub result_type: ScanResultType,
}

impl Signature {
    pub fn new(key: impl Into<String>, pattern: impl Into<String>, offset: i32) -> Self {
        Self {
            key: key.into(),
            pattern: pattern.into(),
            offset,
            result_type: ScanResultType::default(),
        }
    }

    pub fn with_result_type(mut self, result_type: ScanResultType) -> Self {
        self.result_type = result_type;
        self
    }

    pub fn compile(&self) -> Result<Pattern> {
        Pattern::new(&self.pattern).map_err(|source| Error::InvalidPattern {
            key: self.key.clone(),
            source,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SignatureFile {
    List(Vec<Signature>),
    Wrapped { signatures: Vec<Signature> },
}

pub fn parse_signatures(content: &str) -> Result<Vec<Signature>> {
    Ok(match serde_json::from_str(content)? {
        SignatureFile::List(list) => list,
        SignatureFile::Wrapped { signatures } => signatures,
    })
}

pub fn load_signatures<P: AsRef<Path>>(path: P) -> Result<Vec<Signature>> {
    parse_signatures(&fs::read_to_string(path)?)
}

pub fn save_signatures<P: AsRef<Path>>(path: P, signatures: &[Signature]) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(signatures)?)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_result_type_names() {
        for ty in ScanResultType::iter() {
            assert_eq!(ScanResultType::from_str(&ty.to_string()).unwrap(), ty);
        }
        assert_eq!(ScanResultType::default(), ScanResultType::AddressStartOfSig);
        assert!(ScanResultType::from_str("ValueSomewhere").is_err());
    }

    #[test]
    fn test_parse_list() {
        let sigs = parse_signatures(
            r#"[
                {"key": "CHARMAP", "pattern": "AA??CC", "offset": 16},
                {"key": "TARGET", "value": "0102", "type": "ValueAfterSig"}
            ]"#,
        )
        .unwrap();
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0], Signature::new("CHARMAP", "AA??CC", 16));
        assert_eq!(sigs[1].pattern, "0102");
        assert_eq!(sigs[1].offset, 0);
        assert_eq!(sigs[1].result_type, ScanResultType::ValueAfterSig);
    }

    #[test]
    fn test_parse_wrapped() {
        let sigs = parse_signatures(
            r#"{"signatures": [{"key": "A", "pattern": "00", "offset": -4}]}"#,
        )
        .unwrap();
        assert_eq!(sigs, vec![Signature::new("A", "00", -4)]);
        assert!(parse_signatures(r#"{"key": "A"}"#).is_err());
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signatures.json");
        let sigs = vec![
            Signature::new("A", "8B0D", 2),
            Signature::new("B", "??FF", 0).with_result_type(ScanResultType::ValueAtWildCard),
        ];
        save_signatures(&path, &sigs).unwrap();
        assert_eq!(load_signatures(&path).unwrap(), sigs);

        let missing = load_signatures(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, Error::Io(_)));
    }

    #[test]
    fn test_compile() {
        let pattern = Signature::new("A", "AA??", 0).compile().unwrap();
        assert_eq!(pattern.first_wildcard(), Some(1));

        let err = Signature::new("B", "AAA", 0).compile().unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { ref key, .. } if key == "B"));
    }
}
