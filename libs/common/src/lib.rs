pub mod snowflake;

pub use snowflake::SnowflakeGenerator;
