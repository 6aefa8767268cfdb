pub mod datagen;
pub mod divector;
pub mod intervalmanager;
