pub mod buffer;
pub mod image;
pub mod image_view;
pub mod layout_state;
pub mod sampler;
pub mod structured_buffer;
pub mod vertex;
