pub mod field;
pub mod obj;
pub mod value;

pub use field::{FieldCatalogEntry, FieldValue};
pub use obj::{now, Actor, Obj, ObjInput, TenantScope};
