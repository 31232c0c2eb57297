//! Front-end summaries of compiled artifacts.
//!
//! The compiler front end describes every class it emits with a
//! [`ClassDescriptor`]: just enough of the declaration to tell a linkage-visible
//! change from a body-only one. The cache never looks at bytecode.

use std::path::PathBuf;

use ripple_common::{ContentHash, FqName, TargetId};
use serde::{Deserialize, Serialize};

/// Declaration visibility, ordered from least to most visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// Visible inside the declaring class only.
    Private,
    /// Visible to subclasses.
    Protected,
    /// Visible inside the declaring module.
    Internal,
    /// Visible everywhere.
    Public,
}

/// Whether a class can be subclassed or a member overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// Cannot be subclassed / overridden.
    Final,
    /// May be subclassed / overridden.
    Open,
    /// Must be subclassed / implemented.
    Abstract,
}

impl Modality {
    /// Returns `true` unless final.
    pub fn is_overridable(self) -> bool {
        !matches!(self, Self::Final)
    }
}

/// Kind of a class member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    /// A function or method.
    Function,
    /// A property or field.
    Property,
    /// A constructor. Constructors are not inherited and are looked up
    /// through the class name.
    Constructor,
}

/// One declared member of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    /// Unqualified member name.
    pub name: String,
    /// Member kind.
    pub kind: MemberKind,
    /// Rendered signature: parameter and return types, type parameters.
    pub signature: String,
    /// Member visibility.
    pub visibility: Visibility,
    /// Member modality.
    pub modality: Modality,
}

impl MemberDescriptor {
    /// A public final function.
    pub fn function(name: &str, signature: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: MemberKind::Function,
            signature: signature.to_string(),
            visibility: Visibility::Public,
            modality: Modality::Final,
        }
    }

    /// A public final property.
    pub fn property(name: &str, signature: &str) -> Self {
        Self {
            kind: MemberKind::Property,
            ..Self::function(name, signature)
        }
    }

    /// A public constructor.
    pub fn constructor(signature: &str) -> Self {
        Self {
            kind: MemberKind::Constructor,
            ..Self::function("<init>", signature)
        }
    }

    /// Marks the member open.
    pub fn open(mut self) -> Self {
        self.modality = Modality::Open;
        self
    }

    /// Sets the member's visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Linkage-relevant summary of one compiled class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    /// Fully-qualified class name.
    pub fq_name: FqName,
    /// Class visibility.
    pub visibility: Visibility,
    /// Class modality.
    pub modality: Modality,
    /// Declared direct supertypes, in declaration order.
    pub supertypes: Vec<FqName>,
    /// Rendered type parameters, in declaration order.
    pub type_parameters: Vec<String>,
    /// Declared members (not inherited ones).
    pub members: Vec<MemberDescriptor>,
    /// Hash of everything irrelevant to linkage: method bodies, annotations
    /// without retention, debug info.
    pub body_hash: ContentHash,
}

impl ClassDescriptor {
    /// A public final class with no supertypes or members.
    pub fn new(fq_name: impl Into<FqName>) -> Self {
        Self {
            fq_name: fq_name.into(),
            visibility: Visibility::Public,
            modality: Modality::Final,
            supertypes: Vec::new(),
            type_parameters: Vec::new(),
            members: Vec::new(),
            body_hash: ContentHash::from_bytes(b""),
        }
    }

    /// Marks the class open.
    pub fn open(mut self) -> Self {
        self.modality = Modality::Open;
        self
    }

    /// Marks the class abstract.
    pub fn abstract_class(mut self) -> Self {
        self.modality = Modality::Abstract;
        self
    }

    /// Sets the class visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Adds a direct supertype.
    pub fn with_supertype(mut self, supertype: impl Into<FqName>) -> Self {
        self.supertypes.push(supertype.into());
        self
    }

    /// Adds a type parameter.
    pub fn with_type_parameter(mut self, parameter: &str) -> Self {
        self.type_parameters.push(parameter.to_string());
        self
    }

    /// Adds a member.
    pub fn with_member(mut self, member: MemberDescriptor) -> Self {
        self.members.push(member);
        self
    }

    /// Sets the body hash from raw body bytes.
    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body_hash = ContentHash::from_bytes(body);
        self
    }
}

/// What a generated output contains, as far as the cache layer cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// A compiled class.
    Class(ClassDescriptor),
    /// Module-level metadata (cross-module member-extension visibility),
    /// summarized by the hash of its contents.
    ModuleMapping(ContentHash),
    /// Anything else: resources, source maps. Ignored by the caches.
    Other,
}

/// One compiler output attributed to its owning target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Target whose cache records this output.
    pub target: TargetId,
    /// Source files that produced the output.
    pub source_files: Vec<PathBuf>,
    /// Output path.
    pub output_file: PathBuf,
    /// Classified contents.
    pub artifact: Artifact,
}

impl GeneratedFile {
    /// Returns the class descriptor if this output is a class.
    pub fn class(&self) -> Option<&ClassDescriptor> {
        match &self.artifact {
            Artifact::Class(descriptor) => Some(descriptor),
            _ => None,
        }
    }
}
