//! Read-only access to span attributes.
//!
//! The SDK hands attributes to samplers as a slice of [`KeyValue`] and to span
//! processors inside [`opentelemetry_sdk::trace::SpanData`]. Both are viewed
//! through [`AttributeSnapshot`], which only ever reads them.

use opentelemetry::{KeyValue, Value};

/// Borrowed view over a span's attributes at decision or completion time.
#[derive(Clone, Copy, Debug)]
pub struct AttributeSnapshot<'a> {
    attributes: &'a [KeyValue],
}

impl<'a> AttributeSnapshot<'a> {
    #[must_use]
    pub fn new(attributes: &'a [KeyValue]) -> Self {
        Self { attributes }
    }

    /// Returns the value for `key` if it is a string attribute.
    ///
    /// When a key is present more than once the last occurrence wins, which is
    /// how the SDK resolves duplicates when it records the span. Non-string
    /// values are treated as absent.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&'a str> {
        self.attributes
            .iter()
            .rev()
            .find(|kv| kv.key.as_str() == key)
            .and_then(|kv| match &kv.value {
                Value::String(value) => Some(value.as_str()),
                _ => None,
            })
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> + use<'a> {
        self.attributes.iter().map(|kv| kv.key.as_str())
    }

    /// First attribute key starting with `prefix`, stopping at the first hit.
    #[must_use]
    pub fn find_key_with_prefix(&self, prefix: &str) -> Option<&'a str> {
        self.keys().find(|key| key.starts_with(prefix))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl<'a> From<&'a [KeyValue]> for AttributeSnapshot<'a> {
    fn from(attributes: &'a [KeyValue]) -> Self {
        Self::new(attributes)
    }
}
