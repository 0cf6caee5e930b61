pub mod adf;
pub mod html;
