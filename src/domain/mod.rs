pub mod account;
pub mod cycle;
pub mod decision;
pub mod market;
pub mod news;
pub mod order;

pub use account::*;
pub use cycle::*;
pub use decision::*;
pub use market::*;
pub use news::*;
pub use order::*;
