mod asset;
mod category;
mod entity;
mod entity_type;
mod product;

pub use asset::{AssetData, AssetOrigin, AssetRecord};
pub use category::Category;
pub use entity::{next_modified, ActorContext, DeletionQueueEntry, Entity, EntityRecord};
pub use entity_type::EntityType;
pub use product::Product;
