pub mod placement;
pub mod signee;
pub mod types;

pub use placement::{Placement, PlacementType};
pub use signee::{Role, Signee, SigneeColor, SigneeId};
pub use types::{ClientRect, DocumentKey, FieldName, GeometryError, PageRect};
