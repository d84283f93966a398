pub mod fields;
pub mod collection;
pub mod utils;

// Re-export handler functions for use in routing
pub use collection::delete as objs_delete;
pub use collection::get as objs_get;
pub use collection::set as objs_set;
pub use collection::update as objs_update;

pub use fields::list as fields_list;
pub use fields::values as field_values;
