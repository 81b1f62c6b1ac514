//! JSON and XML documents stored in the sandbox.
//!
//! Everything goes through [`Sandbox::read`] and [`Sandbox::write`], so
//! confinement, locking and the size ceiling apply unchanged.

use crate::sandbox::{FsError, Sandbox};
use crate::security::ResolvedPath;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Simple XML document: `<root><content>...</content></root>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "root")]
pub struct XmlDocument {
    pub content: String,
}

/// Read any JSON document as an untyped value
pub fn read_json(sandbox: &Sandbox, path: &ResolvedPath) -> Result<serde_json::Value, FsError> {
    read_json_as(sandbox, path)
}

/// Read a JSON document into a concrete type
pub fn read_json_as<T: DeserializeOwned>(
    sandbox: &Sandbox,
    path: &ResolvedPath,
) -> Result<T, FsError> {
    let bytes = sandbox.read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| FsError::InvalidData(e.to_string()))
}

/// Serialize `value` as indented JSON
pub fn write_json<T: Serialize + ?Sized>(
    sandbox: &Sandbox,
    path: &ResolvedPath,
    value: &T,
) -> Result<(), FsError> {
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|e| FsError::InvalidData(e.to_string()))?;
    bytes.push(b'\n');
    sandbox.write(path, &bytes)
}

/// Validate raw JSON text, then store it as typed
pub fn write_json_text(sandbox: &Sandbox, path: &ResolvedPath, text: &str) -> Result<(), FsError> {
    serde_json::from_str::<serde_json::Value>(text)
        .map_err(|e| FsError::InvalidData(e.to_string()))?;
    sandbox.write(path, text.as_bytes())
}

/// Read an XML document.
///
/// External entities are never resolved; an undeclared entity reference is
/// a parse error.
pub fn read_xml(sandbox: &Sandbox, path: &ResolvedPath) -> Result<XmlDocument, FsError> {
    let text = sandbox.read_to_string(path)?;
    quick_xml::de::from_str(&text).map_err(|e| FsError::InvalidData(e.to_string()))
}

pub fn write_xml(sandbox: &Sandbox, path: &ResolvedPath, doc: &XmlDocument) -> Result<(), FsError> {
    let text = quick_xml::se::to_string(doc).map_err(|e| FsError::InvalidData(e.to_string()))?;
    sandbox.write(path, text.as_bytes())
}
