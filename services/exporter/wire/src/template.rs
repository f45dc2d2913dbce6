//! Template and field descriptors carried by TEMPLATE_DATA and friends.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::{get_count, get_string, get_u16, get_u32, get_u8, put_string, string_len};
use crate::WireError;

/// Smallest possible encoded key: type, id, empty name, enabled
const MIN_KEY_SIZE: usize = 4 + 4 + 4 + 1;
/// Smallest possible encoded template: id, empty schema, empty type, no keys
pub(crate) const MIN_TEMPLATE_SIZE: usize = 2 + 4 + 4 + 4;

/// One field descriptor of a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// IPDR type id; the low byte is the base type
    pub key_type_id: u32,
    /// Field id, unique within its template
    pub key_id: u32,
    /// Field name
    pub name: String,
    /// Whether the field is transmitted
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Key {
    /// Create an enabled key
    pub fn new(key_type_id: u32, key_id: u32, name: impl Into<String>) -> Self {
        Self {
            key_type_id,
            key_id,
            name: name.into(),
            enabled: true,
        }
    }

    /// Base type of the key (derived types share the base type's low byte)
    pub fn base_type(&self) -> u8 {
        (self.key_type_id & 0xff) as u8
    }

    fn encoded_len(&self) -> usize {
        4 + 4 + string_len(&self.name) + 1
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.key_type_id);
        buf.put_u32(self.key_id);
        put_string(buf, &self.name);
        buf.put_u8(self.enabled as u8);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            key_type_id: get_u32(buf, "key type id")?,
            key_id: get_u32(buf, "key id")?,
            name: get_string(buf, "key name")?,
            enabled: get_u8(buf, "key enabled")? != 0,
        })
    }
}

/// One record schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Template id, unique within a transmission context
    pub template_id: u16,
    /// Schema name
    pub schema_name: String,
    /// Record type name
    pub type_name: String,
    /// Field descriptors in order
    #[serde(default)]
    pub keys: Vec<Key>,
}

impl Template {
    /// Create a template without keys
    pub fn new(template_id: u16, schema_name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            template_id,
            schema_name: schema_name.into(),
            type_name: type_name.into(),
            keys: Vec::new(),
        }
    }

    /// Add a key
    pub fn with_key(mut self, key: Key) -> Self {
        self.keys.push(key);
        self
    }

    /// Find a key by id
    pub fn key(&self, key_id: u32) -> Option<&Key> {
        self.keys.iter().find(|k| k.key_id == key_id)
    }

    /// Whether at least one key is enabled
    pub fn has_enabled_keys(&self) -> bool {
        self.keys.iter().any(|k| k.enabled)
    }

    pub(crate) fn encoded_len(&self) -> usize {
        2 + string_len(&self.schema_name)
            + string_len(&self.type_name)
            + 4
            + self.keys.iter().map(Key::encoded_len).sum::<usize>()
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.template_id);
        put_string(buf, &self.schema_name);
        put_string(buf, &self.type_name);
        buf.put_u32(self.keys.len() as u32);
        for key in &self.keys {
            key.encode(buf);
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let template_id = get_u16(buf, "template id")?;
        let schema_name = get_string(buf, "schema name")?;
        let type_name = get_string(buf, "type name")?;
        let count = get_count(buf, MIN_KEY_SIZE, "key count")?;
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(Key::decode(buf)?);
        }
        Ok(Self {
            template_id,
            schema_name,
            type_name,
            keys,
        })
    }
}

/// Encoded size of a template array including its count prefix
pub(crate) fn templates_len(templates: &[Template]) -> usize {
    4 + templates.iter().map(Template::encoded_len).sum::<usize>()
}

pub(crate) fn encode_templates(buf: &mut BytesMut, templates: &[Template]) {
    buf.put_u32(templates.len() as u32);
    for template in templates {
        template.encode(buf);
    }
}

pub(crate) fn decode_templates(buf: &mut Bytes) -> Result<Vec<Template>, WireError> {
    let count = get_count(buf, MIN_TEMPLATE_SIZE, "template count")?;
    let mut templates = Vec::with_capacity(count);
    for _ in 0..count {
        templates.push(Template::decode(buf)?);
    }
    Ok(templates)
}
