pub mod erc20;
pub mod factory;
pub mod pair;
pub mod smartchef;

pub use erc20::IERC20;
pub use factory::IFactory;
pub use pair::{IPair, Swap};
pub use smartchef::ISmartChef;
