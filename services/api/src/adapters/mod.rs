pub mod db;
pub mod gemini;
pub mod pdf;
pub mod storage;
pub mod stripe;

pub use db::DbAdapter;
pub use gemini::GeminiExamAdapter;
pub use storage::HttpStorageAdapter;
pub use stripe::StripeAdapter;
