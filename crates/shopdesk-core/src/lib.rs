pub mod case;
pub mod ids;
