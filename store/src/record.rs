//! A fixed-schema record and its delimited line codec.
//!
//! [Record] is the unit of storage for [crate::index::Index]: an integer key,
//! two free-text fields, and an integer reference to another record. On disk
//! a record is a single text line, fields joined by [DELIMITER] and closed by
//! [TERMINATOR]:
//!
//! ```text
//! id,name,bio,manager_id\n
//! ```
//!
//! The encoded length of a record is used for page-capacity arithmetic, so
//! [Record::size] must agree exactly with [Record::encode] everywhere.
//!
//! Text fields may not contain the delimiter or the terminator. Such values
//! are rejected at construction rather than escaped: the on-disk format has
//! no escape sequences, and a record that cannot survive a round trip must
//! never reach a page.

use std::fmt;
use thiserror::Error;

/// Field separator in a record's serialized form.
pub const DELIMITER: char = ',';

/// Terminator of a record's serialized form.
pub const TERMINATOR: char = '\n';

/// Number of fields in a record's serialized form.
const FIELDS: usize = 4;

/// Errors that can occur when constructing or decoding a [Record].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed record: expected {FIELDS} fields, found {0}")]
    MalformedRecord(usize),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("field contains reserved character: {0:?}")]
    ReservedCharacter(char),
}

/// A single record, immutable once constructed.
///
/// Structural equality (`PartialEq`) compares every field and exists for
/// callers and tests; the index itself identifies records by [Record::id]
/// alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: u64,
    name: String,
    bio: String,
    manager_id: u64,
}

impl Record {
    /// Construct a record, rejecting text fields that contain the delimiter
    /// or the terminator.
    pub fn new(id: u64, name: String, bio: String, manager_id: u64) -> Result<Self, Error> {
        for field in [&name, &bio] {
            if let Some(reserved) = field.chars().find(|c| *c == DELIMITER || *c == TERMINATOR) {
                return Err(Error::ReservedCharacter(reserved));
            }
        }
        Ok(Self {
            id,
            name,
            bio,
            manager_id,
        })
    }

    /// Decode a record from a serialized line (without its terminator).
    pub fn decode(line: &str) -> Result<Self, Error> {
        let fields: Vec<&str> = line.split(DELIMITER).collect();
        if fields.len() != FIELDS {
            return Err(Error::MalformedRecord(fields.len()));
        }
        let id = fields[0]
            .parse::<u64>()
            .map_err(|_| Error::InvalidKey(fields[0].to_string()))?;
        let manager_id = fields[3]
            .parse::<u64>()
            .map_err(|_| Error::InvalidKey(fields[3].to_string()))?;
        Self::new(id, fields[1].to_string(), fields[2].to_string(), manager_id)
    }

    /// Serialize the record to its line form, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{id}{d}{name}{d}{bio}{d}{manager_id}{t}",
            id = self.id,
            name = self.name,
            bio = self.bio,
            manager_id = self.manager_id,
            d = DELIMITER,
            t = TERMINATOR,
        )
        .into_bytes()
    }

    /// The serialized length of the record in bytes.
    ///
    /// Always equal to `self.encode().len()`.
    pub fn size(&self) -> usize {
        digits(self.id) + self.name.len() + self.bio.len() + digits(self.manager_id) + FIELDS
    }

    /// The record's key.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The record's name field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The record's bio field.
    pub fn bio(&self) -> &str {
        &self.bio
    }

    /// The key of the record's manager.
    pub fn manager_id(&self) -> u64 {
        self.manager_id
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\tID: {}", self.id)?;
        writeln!(f, "\tNAME: {}", self.name)?;
        writeln!(f, "\tBIO: {}", self.bio)?;
        write!(f, "\tMANAGER_ID: {}", self.manager_id)
    }
}

/// Decimal digit count of `value` (the width `value` occupies when encoded).
fn digits(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    (value.ilog10() + 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let record = Record::new(
            42,
            "Ada Lovelace".to_string(),
            "analytical engines".to_string(),
            7,
        )
        .unwrap();

        let encoded = record.encode();
        assert_eq!(encoded.len(), record.size());

        let line = std::str::from_utf8(&encoded).unwrap();
        let decoded = Record::decode(line.trim_end_matches(TERMINATOR)).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_size_matches_encoding() {
        // Zero keys and empty text fields are the smallest encoding.
        let record = Record::new(0, String::new(), String::new(), 0).unwrap();
        assert_eq!(record.size(), record.encode().len());
        assert_eq!(record.encode(), b"0,,,0\n");

        // Multi-digit keys widen the encoding.
        let record = Record::new(1_000_000, "a".to_string(), "b".to_string(), 999).unwrap();
        assert_eq!(record.size(), record.encode().len());
    }

    #[test]
    fn test_reserved_characters_rejected() {
        let err = Record::new(1, "a,b".to_string(), "bio".to_string(), 2).unwrap_err();
        assert_eq!(err, Error::ReservedCharacter(','));

        let err = Record::new(1, "name".to_string(), "line\nbreak".to_string(), 2).unwrap_err();
        assert_eq!(err, Error::ReservedCharacter('\n'));
    }

    #[test]
    fn test_decode_malformed() {
        assert_eq!(
            Record::decode("7,onlythreefields").unwrap_err(),
            Error::MalformedRecord(2)
        );
        assert_eq!(
            Record::decode("1,a,b,2,3").unwrap_err(),
            Error::MalformedRecord(5)
        );
    }

    #[test]
    fn test_decode_invalid_key() {
        assert_eq!(
            Record::decode("notakey,a,b,2").unwrap_err(),
            Error::InvalidKey("notakey".to_string())
        );
        assert_eq!(
            Record::decode("1,a,b,-2").unwrap_err(),
            Error::InvalidKey("-2".to_string())
        );
    }

    #[test]
    fn test_key_identity_is_not_structural_equality() {
        let first = Record::new(9, "x".to_string(), "one".to_string(), 1).unwrap();
        let second = Record::new(9, "x".to_string(), "two".to_string(), 1).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn test_display() {
        let record = Record::new(3, "Grace".to_string(), "compilers".to_string(), 1).unwrap();
        let rendered = format!("{record}");
        assert!(rendered.contains("\tID: 3"));
        assert!(rendered.contains("\tNAME: Grace"));
        assert!(rendered.contains("\tBIO: compilers"));
        assert!(rendered.contains("\tMANAGER_ID: 1"));
    }
}
