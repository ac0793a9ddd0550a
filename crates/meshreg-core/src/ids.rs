//! Id and revision minting.

use uuid::Uuid;

/// A random id: uuid-v4 hex without hyphens.
pub fn new_uuid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A fresh record revision.
pub fn new_revision() -> String {
    new_uuid()
}
