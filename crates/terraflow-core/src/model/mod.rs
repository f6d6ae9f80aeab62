pub mod address;
pub mod config;
pub mod schema;
pub mod state;
pub mod value;

pub use address::ResourceAddress;
pub use config::{DesiredConfig, ResourceConfig};
pub use schema::{
    AttrType, AttributeSchema, ID_ATTRIBUTE, ResourceSchema, SchemaSet, SchemaSource, Timeouts,
};
pub use state::{Attributes, ResourceObject, STATE_VERSION, StateEntry, StateSnapshot};
pub use value::{Reference, Value};
