use std::collections::HashMap;

use crate::types::{ModuleConstructorMap, ModuleSchema};

pub mod seq;
pub mod utils;

pub fn get_constructors() -> ModuleConstructorMap {
    let mut map = HashMap::new();
    seq::install_constructors(&mut map);
    map
}

pub fn schema() -> Vec<ModuleSchema> {
    seq::schemas()
}
