//! Object model and class system

use crate::handle::ClassIndex;
use crate::value::Value;
use crate::{VmError, VmResult};

/// Object instance (heap-allocated)
#[derive(Debug, Clone)]
pub struct Object {
    /// Runtime class of this object
    pub class: ClassIndex,
    /// Instance field values
    pub fields: Vec<Value>,
}

impl Object {
    /// Create a new object with null fields
    pub fn new(class: ClassIndex, field_count: usize) -> Self {
        Self {
            class,
            fields: vec![Value::null(); field_count],
        }
    }

    /// Get a field value by index
    pub fn get_field(&self, index: usize) -> Option<Value> {
        self.fields.get(index).copied()
    }

    /// Set a field value by index, returning the previous value
    pub fn set_field(&mut self, index: usize, value: Value) -> VmResult<Value> {
        let count = self.fields.len();
        let slot = self
            .fields
            .get_mut(index)
            .ok_or(VmError::FieldOutOfRange { index, count })?;
        Ok(std::mem::replace(slot, value))
    }

    /// Get number of fields
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Loaded class
#[derive(Debug, Clone)]
pub struct Class {
    /// Fully qualified class name
    pub name: String,
    /// Class-static field values
    pub static_fields: Vec<Value>,
    /// Number of instance fields (including inherited)
    pub instance_field_count: usize,
    /// Superclass (null for `java/lang/Object`)
    pub superclass: ClassIndex,
}

impl Class {
    /// Create a new class
    pub fn new(name: impl Into<String>, static_field_count: usize, instance_field_count: usize) -> Self {
        Self {
            name: name.into(),
            static_fields: vec![Value::null(); static_field_count],
            instance_field_count,
            superclass: ClassIndex::NULL,
        }
    }

    /// Create a new class with a superclass
    pub fn with_superclass(
        name: impl Into<String>,
        static_field_count: usize,
        instance_field_count: usize,
        superclass: ClassIndex,
    ) -> Self {
        Self {
            superclass,
            ..Self::new(name, static_field_count, instance_field_count)
        }
    }

    /// Get a static field value by index
    pub fn get_static(&self, index: usize) -> Option<Value> {
        self.static_fields.get(index).copied()
    }

    /// Set a static field value by index, returning the previous value
    pub fn set_static(&mut self, index: usize, value: Value) -> VmResult<Value> {
        let count = self.static_fields.len();
        let slot = self
            .static_fields
            .get_mut(index)
            .ok_or(VmError::FieldOutOfRange { index, count })?;
        Ok(std::mem::replace(slot, value))
    }

    /// Get number of static fields
    pub fn static_field_count(&self) -> usize {
        self.static_fields.len()
    }
}
