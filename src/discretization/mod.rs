pub mod fields;
pub mod generator;
pub mod master_element;
pub mod mesh;
