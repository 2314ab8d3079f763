pub mod classification;
pub mod dialog;
