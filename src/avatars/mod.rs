pub mod services;

pub use services::{AvatarManager, AvatarUpload};
