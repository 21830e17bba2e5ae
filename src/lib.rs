pub mod bitmap_cache;
pub mod comment;
pub mod config;
pub mod drawing;
pub mod emoji;
pub mod encoding;
pub mod error_codes;
pub mod fonts;
pub mod frame;
pub mod geometry;
pub mod highlight;
pub mod image_pack;
pub mod images;
pub mod inline;
pub mod message;
pub mod options;
pub mod preprocess;
pub mod render;
pub mod section;
pub mod text;
