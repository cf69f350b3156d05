use crate::types::{Module, ModuleConstructorMap, ModuleSchema};

pub mod range;
pub mod scale;
pub mod slips;
pub mod slipspander;
pub mod track;

fn new_slips() -> Box<dyn Module> {
    Box::new(slips::Slips::new())
}

fn new_slipspander() -> Box<dyn Module> {
    Box::new(slipspander::Slipspander::new())
}

pub fn install_constructors(map: &mut ModuleConstructorMap) {
    map.insert(slips::MODULE_TYPE.to_string(), new_slips);
    map.insert(slipspander::MODULE_TYPE.to_string(), new_slipspander);
}

pub fn schemas() -> Vec<ModuleSchema> {
    vec![slips::Slips::schema(), slipspander::Slipspander::schema()]
}
