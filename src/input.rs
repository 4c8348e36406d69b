//! Classification and content-addressing of the polymorphic `input` field.
//!
//! An embeddings request carries one of four input shapes: a single string, an
//! array of strings, a single token sequence (array of integers), or an array
//! of token sequences. Each shape expands to an ordered list of *logical
//! inputs*; a logical input is addressed by the lowercase-hex SHA-1 of its
//! canonical byte form (UTF-8 bytes for strings, decimal tokens joined by `,`
//! for sequences).

use serde_json::Value;
use sha1::{Digest, Sha1};

/// Rejection reasons for the `input` field.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("input must not be an empty array")]
    Empty,

    #[error("input array elements must all be the same type")]
    Mixed,

    #[error("token values must be integers")]
    NonIntegerToken,

    #[error("input must be a string, an array of strings, an array of integers, or an array of integer arrays")]
    UnsupportedShape,
}

/// The four accepted shapes of the `input` field.
///
/// The shape is remembered so that a sub-request for any index subset can be
/// rebuilt in the same form the client used (scalar in, scalar out).
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingInput {
    /// A single string: one logical input.
    Single(String),
    /// An array of strings: one logical input per element.
    StringList(Vec<String>),
    /// A single token sequence: one logical input.
    Tokens(Vec<i64>),
    /// An array of token sequences: one logical input per inner array.
    TokenLists(Vec<Vec<i64>>),
}

impl EmbeddingInput {
    /// Classify a decoded JSON value into one of the four shapes.
    ///
    /// Arrays are classified by their first element and must be homogeneous;
    /// empty arrays (outer or inner) and non-integer numbers are rejected.
    pub fn from_value(value: &Value) -> Result<Self, InputError> {
        match value {
            Value::String(s) => Ok(Self::Single(s.clone())),
            Value::Array(items) => {
                let first = items.first().ok_or(InputError::Empty)?;
                match first {
                    Value::String(_) => {
                        let strings = items
                            .iter()
                            .map(|v| v.as_str().map(str::to_owned).ok_or(InputError::Mixed))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Self::StringList(strings))
                    }
                    Value::Number(_) => Ok(Self::Tokens(parse_tokens(items)?)),
                    Value::Array(_) => {
                        let lists = items
                            .iter()
                            .map(|v| match v {
                                Value::Array(inner) => {
                                    if inner.is_empty() {
                                        return Err(InputError::Empty);
                                    }
                                    parse_tokens(inner)
                                }
                                _ => Err(InputError::Mixed),
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Self::TokenLists(lists))
                    }
                    _ => Err(InputError::UnsupportedShape),
                }
            }
            _ => Err(InputError::UnsupportedShape),
        }
    }

    /// Number of logical inputs this request must return embeddings for.
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) | Self::Tokens(_) => 1,
            Self::StringList(items) => items.len(),
            Self::TokenLists(lists) => lists.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content address of each logical input, in order.
    pub fn hashes(&self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![hash_bytes(s.as_bytes())],
            Self::StringList(items) => {
                items.iter().map(|s| hash_bytes(s.as_bytes())).collect()
            }
            Self::Tokens(tokens) => vec![hash_tokens(tokens)],
            Self::TokenLists(lists) => lists.iter().map(|t| hash_tokens(t)).collect(),
        }
    }

    /// Rebuild the `input` value for a subset of logical inputs, preserving
    /// the original shape.
    ///
    /// Scalar shapes return the scalar form (only meaningful when `indices`
    /// is `[0]`); list shapes return a list of the selected elements in the
    /// given order.
    pub fn subset(&self, indices: &[usize]) -> Value {
        match self {
            Self::Single(s) => Value::String(s.clone()),
            Self::StringList(items) => {
                Value::Array(indices.iter().map(|&i| Value::String(items[i].clone())).collect())
            }
            Self::Tokens(tokens) => token_array(tokens),
            Self::TokenLists(lists) => {
                Value::Array(indices.iter().map(|&i| token_array(&lists[i])).collect())
            }
        }
    }
}

fn parse_tokens(items: &[Value]) -> Result<Vec<i64>, InputError> {
    items
        .iter()
        .map(|v| match v {
            Value::Number(n) => n.as_i64().ok_or(InputError::NonIntegerToken),
            _ => Err(InputError::Mixed),
        })
        .collect()
}

fn token_array(tokens: &[i64]) -> Value {
    Value::Array(tokens.iter().map(|&t| Value::from(t)).collect())
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Canonical form of a token sequence: decimal digits joined by `,`.
fn hash_tokens(tokens: &[i64]) -> String {
    let joined = tokens
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",");
    hash_bytes(joined.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_string() {
        let input = EmbeddingInput::from_value(&json!("Hello, world!")).unwrap();
        assert_eq!(input.len(), 1);
        assert_eq!(
            input.hashes(),
            vec!["943a702d06f34599aee1f8da8ef9f7296031d699".to_string()]
        );
    }

    #[test]
    fn test_string_list() {
        let input = EmbeddingInput::from_value(&json!(["Hello", "World"])).unwrap();
        assert_eq!(input.len(), 2);
        assert_eq!(
            input.hashes(),
            vec![
                "f7ff9e8b7bb2e09b70935a5d785e0cc5d9d0abf0".to_string(),
                "70c07ec18ef89c5309bbb0937f3a6342411e1fdd".to_string(),
            ]
        );
    }

    #[test]
    fn test_token_sequence() {
        let input = EmbeddingInput::from_value(&json!([1, 2, 3])).unwrap();
        assert_eq!(input.len(), 1);
        // SHA1("1,2,3")
        assert_eq!(
            input.hashes(),
            vec!["b85e2d4914e22b5ad3b82b312b3dc405dc17dcb8".to_string()]
        );
    }

    #[test]
    fn test_token_sequence_list() {
        let input = EmbeddingInput::from_value(&json!([[1, 2], [3, 4]])).unwrap();
        assert_eq!(input.len(), 2);
        assert_eq!(
            input.hashes(),
            vec![
                "2219fecb861ae82ba2706e49a065c8d155e9f2a6".to_string(), // SHA1("1,2")
                "f10e95f0fbaf716f39264aca91a104fa0054432e".to_string(), // SHA1("3,4")
            ]
        );
    }

    #[test]
    fn test_scalar_and_one_element_list_are_distinct_shapes() {
        let scalar = EmbeddingInput::from_value(&json!("hello")).unwrap();
        let list = EmbeddingInput::from_value(&json!(["hello"])).unwrap();
        assert_eq!(scalar.len(), 1);
        assert_eq!(list.len(), 1);
        assert_ne!(scalar, list);
        // Same logical input, same content address.
        assert_eq!(scalar.hashes(), list.hashes());
    }

    #[test]
    fn test_rejects_empty_array() {
        let err = EmbeddingInput::from_value(&json!([])).unwrap_err();
        assert!(matches!(err, InputError::Empty));
    }

    #[test]
    fn test_rejects_empty_inner_array() {
        let err = EmbeddingInput::from_value(&json!([[1, 2], []])).unwrap_err();
        assert!(matches!(err, InputError::Empty));
    }

    #[test]
    fn test_rejects_mixed_strings_and_numbers() {
        let err = EmbeddingInput::from_value(&json!(["a", 1])).unwrap_err();
        assert!(matches!(err, InputError::Mixed));

        let err = EmbeddingInput::from_value(&json!([1, "a"])).unwrap_err();
        assert!(matches!(err, InputError::Mixed));
    }

    #[test]
    fn test_rejects_nested_strings() {
        let err = EmbeddingInput::from_value(&json!([["a", "b"]])).unwrap_err();
        assert!(matches!(err, InputError::Mixed));
    }

    #[test]
    fn test_rejects_float_tokens() {
        let err = EmbeddingInput::from_value(&json!([1.5, 2.5])).unwrap_err();
        assert!(matches!(err, InputError::NonIntegerToken));

        let err = EmbeddingInput::from_value(&json!([[1, 2], [3.5]])).unwrap_err();
        assert!(matches!(err, InputError::NonIntegerToken));
    }

    #[test]
    fn test_rejects_other_shapes() {
        for value in [json!(42), json!(true), json!(null), json!({"text": "x"})] {
            let err = EmbeddingInput::from_value(&value).unwrap_err();
            assert!(matches!(err, InputError::UnsupportedShape));
        }
        let err = EmbeddingInput::from_value(&json!([true])).unwrap_err();
        assert!(matches!(err, InputError::UnsupportedShape));
    }

    #[test]
    fn test_subset_preserves_shape() {
        let scalar = EmbeddingInput::from_value(&json!("Hello")).unwrap();
        assert_eq!(scalar.subset(&[0]), json!("Hello"));

        let strings = EmbeddingInput::from_value(&json!(["a", "b", "c"])).unwrap();
        assert_eq!(strings.subset(&[0, 2]), json!(["a", "c"]));

        let tokens = EmbeddingInput::from_value(&json!([1, 2, 3])).unwrap();
        assert_eq!(tokens.subset(&[0]), json!([1, 2, 3]));

        let lists = EmbeddingInput::from_value(&json!([[1, 2], [3, 4], [5, 6], [7, 8]])).unwrap();
        assert_eq!(lists.subset(&[0, 2]), json!([[1, 2], [5, 6]]));
    }

    #[test]
    fn test_negative_tokens_canonical_form() {
        // SHA1("-1,0") must differ from SHA1("-10") -- the comma is part of
        // the canonical bytes.
        let a = EmbeddingInput::from_value(&json!([-1, 0])).unwrap();
        let b = EmbeddingInput::from_value(&json!([-10])).unwrap();
        assert_ne!(a.hashes(), b.hashes());
    }
}
