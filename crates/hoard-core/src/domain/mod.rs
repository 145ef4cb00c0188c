//! Domain model (entity contract, task ids, naming, lifecycle state).

pub mod codec;
pub mod entity;
pub mod ids;
pub mod naming;
pub mod state;

pub use self::entity::{Entity, EntityFactory};
pub use self::ids::TaskId;
pub use self::naming::{NamingError, TableFormat};
pub use self::state::StoreState;
