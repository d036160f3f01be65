//! The loadable byte image of a generated class.
//!
//! Layout: `SPRG` magic, a little-endian format version, the SHA-256 digest of
//! the body, then the JSON body itself.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SprigError;
use crate::host::ClassFlags;
use crate::link::CallSiteSpec;
use crate::types::Ty;
use crate::vm::bytecode::{Code, Constant};

const MAGIC: &[u8; 4] = b"SPRG";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 32;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: Ty,
    pub is_static: bool,
    pub mutable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<Constant>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub params: Vec<Ty>,
    pub param_names: Vec<String>,
    pub ret: Ty,
    pub is_static: bool,
    pub is_varargs: bool,
    /// `None` for abstract methods.
    pub code: Option<Code>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassFile {
    pub name: String,
    pub superclass: String,
    pub interfaces: Vec<String>,
    pub flags: ClassFlags,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
    pub call_sites: Vec<CallSiteSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ClassFile {
    pub fn new(name: &str, superclass: &str) -> Self {
        Self {
            name: name.to_string(),
            superclass: superclass.to_string(),
            interfaces: Vec::new(),
            flags: ClassFlags::default(),
            fields: Vec::new(),
            methods: Vec::new(),
            call_sites: Vec::new(),
            source: None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SprigError> {
        let body = serde_json::to_vec(self)
            .map_err(|err| SprigError::internal(format!("cannot serialize {}: {}", self.name, err)))?;
        let digest = Sha256::digest(&body);
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&digest);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SprigError> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(SprigError::class_format("bad magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(SprigError::class_format(format!("unsupported class version {}", version)));
        }
        let body = &bytes[HEADER_LEN..];
        if Sha256::digest(body).as_slice() != &bytes[6..HEADER_LEN] {
            return Err(SprigError::class_format("digest mismatch"));
        }
        serde_json::from_slice(body).map_err(|err| SprigError::class_format(format!("malformed class body: {}", err)))
    }

    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::bytecode::Instruction;

    fn sample() -> ClassFile {
        let mut class = ClassFile::new("user$eval__1", crate::host::names::OBJECT);
        class.methods.push(MethodDef {
            name: "run".into(),
            params: vec![],
            param_names: vec![],
            ret: Ty::Any,
            is_static: true,
            is_varargs: false,
            code: Some(Code {
                instructions: vec![Instruction::Const(Constant::Nil), Instruction::Return(Ty::Any)],
                max_stack: 1,
                ..Code::default()
            }),
        });
        class
    }

    #[test]
    fn tampered_images_are_rejected() -> Result<(), SprigError> {
        let mut bytes = sample().to_bytes()?;
        assert_eq!(ClassFile::from_bytes(&bytes)?, sample());
        let last = bytes.len() - 2;
        bytes[last] ^= 1;
        assert!(matches!(ClassFile::from_bytes(&bytes), Err(SprigError::ClassFormat(_))));
        assert!(matches!(ClassFile::from_bytes(b"JUNK"), Err(SprigError::ClassFormat(_))));
        Ok(())
    }
}
