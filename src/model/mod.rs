pub mod city;
pub mod common;
pub mod event;
