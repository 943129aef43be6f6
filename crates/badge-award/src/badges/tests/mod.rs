mod common;
mod criteria;
mod definitions;
