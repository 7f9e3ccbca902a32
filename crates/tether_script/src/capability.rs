//! Capability types and their validated descriptors
//!
//! A [`CapabilityType`] is the host-side metadata of an interface: its name,
//! kind, supertypes, and declared method signatures. Binding validates it
//! against a host object and freezes the result into a
//! [`CapabilityDescriptor`], the ordered method table the dispatcher indexes.

use crate::error::BindError;
use crate::host::HostObject;
use crate::value::TypeTag;
use std::collections::HashSet;

/// Whether a host type is a pure method contract or carries state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Interface,
    Class,
}

/// Declared signature of one capability method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    name: String,
    params: Vec<TypeTag>,
    returns: TypeTag,
}

impl MethodSignature {
    pub fn new<I>(name: impl Into<String>, params: I, returns: TypeTag) -> Self
    where
        I: IntoIterator<Item = TypeTag>,
    {
        Self {
            name: name.into(),
            params: params.into_iter().collect(),
            returns,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[TypeTag] {
        &self.params
    }

    pub fn returns(&self) -> &TypeTag {
        &self.returns
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    fn check_supported(&self) -> Result<(), BindError> {
        if !self.returns.is_return() {
            return Err(BindError::UnsupportedReturn {
                method: self.name.clone(),
                type_tag: self.returns.clone(),
            });
        }
        if let Some(param) = self.params.iter().find(|param| !param.is_parameter()) {
            return Err(BindError::UnsupportedParameter {
                method: self.name.clone(),
                type_tag: param.clone(),
            });
        }
        Ok(())
    }
}

/// Host-side description of a type offered for binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityType {
    name: String,
    kind: TypeKind,
    extends: Vec<String>,
    methods: Vec<MethodSignature>,
}

impl CapabilityType {
    /// Describe an interface type.
    pub fn interface(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Interface)
    }

    /// Describe a concrete, stateful type. Classes can be described but never bound.
    pub fn class(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Class)
    }

    fn with_kind(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            extends: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Record a supertype.
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.extends.push(supertype.into());
        self
    }

    /// Declare a method. Declaration order is the dispatch order.
    pub fn method<I>(mut self, name: impl Into<String>, params: I, returns: TypeTag) -> Self
    where
        I: IntoIterator<Item = TypeTag>,
    {
        self.methods.push(MethodSignature::new(name, params, returns));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn supertypes(&self) -> &[String] {
        &self.extends
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    /// Validate this type for binding `object` and freeze its method table.
    ///
    /// Checks run in a fixed order and the first failure wins: interface kind,
    /// flatness, the object implementing the type and every declared method,
    /// supported signatures, then unique method names.
    pub fn describe(&self, object: &dyn HostObject) -> Result<CapabilityDescriptor, BindError> {
        if self.kind != TypeKind::Interface {
            return Err(BindError::NotACapability {
                type_name: self.name.clone(),
            });
        }
        if !self.extends.is_empty() {
            return Err(BindError::NotFlat {
                type_name: self.name.clone(),
                extends: self.extends.clone(),
            });
        }
        if !object.implements(&self.name) {
            return Err(BindError::NotSatisfied {
                type_name: self.name.clone(),
            });
        }
        if let Some(missing) = self.methods.iter().find(|m| !object.responds_to(m.name())) {
            tracing::debug!(
                capability = %self.name,
                method = missing.name(),
                "host object lacks declared method"
            );
            return Err(BindError::NotSatisfied {
                type_name: self.name.clone(),
            });
        }

        let mut seen = HashSet::with_capacity(self.methods.len());
        for method in &self.methods {
            method.check_supported()?;
            if !seen.insert(method.name()) {
                return Err(BindError::Overloaded {
                    type_name: self.name.clone(),
                    method: method.name.clone(),
                });
            }
        }

        Ok(CapabilityDescriptor {
            type_name: self.name.clone(),
            methods: self.methods.clone(),
        })
    }
}

/// Validated, immutable method table of a bound capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    type_name: String,
    methods: Vec<MethodSignature>,
}

impl CapabilityDescriptor {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    pub fn method(&self, index: usize) -> Option<&MethodSignature> {
        self.methods.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|method| method.name == name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
