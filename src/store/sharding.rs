//! Sharding definitions
//!
//! ## Grammar
//! ```text
//! definition := column ( ' ' column )*
//! column     := name [ '(' count [ ',' low '-' [ high ] ] ')' ] [ '=' options ]
//! ```
//! `count` defaults to 1 and the hash range to `[0, u32::MAX)`. Options run to
//! the end of the token and are handed to the engine untouched.
//!
//! A family with one shard is stored as a column family called `name`; with
//! N shards as `name-0` .. `name-{N-1}`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StoreError};

/// Upper end of the default hash range
pub const HASH_MAX: u32 = u32::MAX;

/// One logical family of a sharding definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamilySpec {
    pub name: String,
    pub shard_count: usize,
    /// First key byte fed to the shard hash
    pub hash_low: u32,
    /// One past the last key byte fed to the shard hash
    pub hash_high: u32,
    /// Engine option string for every shard of this family
    pub options: String,
}

impl ColumnFamilySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shard_count: 1,
            hash_low: 0,
            hash_high: HASH_MAX,
            options: String::new(),
        }
    }

    /// Engine column family names, in shard order
    pub fn shard_names(&self) -> Vec<String> {
        if self.shard_count == 1 {
            vec![self.name.clone()]
        } else {
            (0..self.shard_count)
                .map(|i| format!("{}-{}", self.name, i))
                .collect()
        }
    }

    /// Same name, shard count and hash range; options are not compared
    pub fn same_layout(&self, other: &ColumnFamilySpec) -> bool {
        self.name == other.name
            && self.shard_count == other.shard_count
            && self.hash_low == other.hash_low
            && self.hash_high == other.hash_high
    }
}

/// Canonical text of one column
impl fmt::Display for ColumnFamilySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        let full_range = self.hash_low == 0 && self.hash_high == HASH_MAX;
        if !full_range {
            write!(f, "({},{}-", self.shard_count, self.hash_low)?;
            if self.hash_high != HASH_MAX {
                write!(f, "{}", self.hash_high)?;
            }
            f.write_str(")")?;
        } else if self.shard_count != 1 {
            write!(f, "({})", self.shard_count)?;
        }
        if !self.options.is_empty() {
            write!(f, "={}", self.options)?;
        }
        Ok(())
    }
}

/// A parsed sharding definition, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardingDefinition {
    specs: Vec<ColumnFamilySpec>,
}

impl ShardingDefinition {
    pub fn parse(text: &str) -> Result<Self> {
        let mut specs: Vec<ColumnFamilySpec> = Vec::new();
        let mut offset = 0;
        for token in text.split(' ') {
            let base = offset;
            offset += token.len() + 1;
            if token.is_empty() {
                continue;
            }
            let spec = parse_column(token, base)?;
            if specs.iter().any(|s| s.name == spec.name) {
                return Err(syntax(base, format!("duplicate column family '{}'", spec.name)));
            }
            specs.push(spec);
        }
        Ok(Self { specs })
    }

    pub fn from_specs(specs: Vec<ColumnFamilySpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[ColumnFamilySpec] {
        &self.specs
    }

    pub fn find(&self, name: &str) -> Option<&ColumnFamilySpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Every engine column family name the definition declares
    pub fn column_names(&self) -> Vec<String> {
        self.specs.iter().flat_map(|s| s.shard_names()).collect()
    }

    /// Structural equality: order and per-family options are ignored
    pub fn same_layout(&self, other: &ShardingDefinition) -> bool {
        if self.specs.len() != other.specs.len() {
            return false;
        }
        let mut mine: Vec<&ColumnFamilySpec> = self.specs.iter().collect();
        let mut theirs: Vec<&ColumnFamilySpec> = other.specs.iter().collect();
        mine.sort_by(|a, b| a.name.cmp(&b.name));
        theirs.sort_by(|a, b| a.name.cmp(&b.name));
        mine.iter().zip(&theirs).all(|(a, b)| a.same_layout(b))
    }
}

impl FromStr for ShardingDefinition {
    type Err = StoreError;

    fn from_str(text: &str) -> Result<Self> {
        Self::parse(text)
    }
}

/// Canonical text, columns separated by single spaces
impl fmt::Display for ShardingDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, spec) in self.specs.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", spec)?;
        }
        Ok(())
    }
}

// =============================================================================
// Column parser
// =============================================================================

fn parse_column(token: &str, base: usize) -> Result<ColumnFamilySpec> {
    let (column, options) = match token.split_once('=') {
        Some((column, options)) => (column, options),
        None => (token, ""),
    };

    let (name, shards) = match column.find('(') {
        Some(paren) => (&column[..paren], Some(paren + 1)),
        None => (column, None),
    };
    if name.is_empty() {
        return Err(syntax(base, "empty column family name".to_string()));
    }

    let mut spec = ColumnFamilySpec::new(name);
    spec.options = options.to_string();

    if let Some(start) = shards {
        let mut cursor = Cursor {
            text: column,
            pos: start,
            base,
        };
        let count_at = cursor.offset();
        let count = cursor.integer()?.ok_or_else(|| cursor.error("expecting integer"))?;
        spec.shard_count = usize::try_from(count)
            .ok()
            .filter(|&c| c >= 1)
            .ok_or_else(|| syntax(count_at, "shard count must be at least 1".to_string()))?;

        if cursor.eat(b',') {
            let low_at = cursor.offset();
            let low = cursor.integer()?.ok_or_else(|| cursor.error("expecting integer"))?;
            spec.hash_low = to_u32(low, low_at)?;
            if !cursor.eat(b'-') {
                return Err(cursor.error("expecting '-'"));
            }
            let high_at = cursor.offset();
            if let Some(high) = cursor.integer()? {
                spec.hash_high = to_u32(high, high_at)?;
            }
            if spec.hash_low >= spec.hash_high {
                return Err(syntax(low_at, "hash_low must be below hash_high".to_string()));
            }
        }
        if !cursor.eat(b')') {
            return Err(cursor.error("expecting ')'"));
        }
        if !cursor.at_end() {
            return Err(cursor.error("unexpected characters after ')'"));
        }
    }

    Ok(spec)
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
    /// Offset of `text` within the whole definition
    base: usize,
}

impl Cursor<'_> {
    fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.text.as_bytes().get(self.pos) == Some(&byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Decimal digits at the cursor; `None` if there are none
    fn integer(&mut self) -> Result<Option<u64>> {
        let digits = self.text[self.pos..]
            .bytes()
            .take_while(u8::is_ascii_digit)
            .count();
        if digits == 0 {
            return Ok(None);
        }
        let at = self.offset();
        let value = self.text[self.pos..self.pos + digits]
            .parse::<u64>()
            .map_err(|_| syntax(at, "integer out of range".to_string()))?;
        self.pos += digits;
        Ok(Some(value))
    }

    fn error(&self, message: &str) -> StoreError {
        syntax(self.offset(), message.to_string())
    }
}

fn to_u32(value: u64, offset: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| syntax(offset, "integer out of range".to_string()))
}

fn syntax(offset: usize, message: String) -> StoreError {
    StoreError::ShardingSyntax { offset, message }
}
