//! Model Tests Module

mod flow_definitions;
