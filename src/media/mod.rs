pub mod services;

pub use services::{delete, upload, MediaFolder, UploadItem, UploadedMedia};
