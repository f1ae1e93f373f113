use std::collections::BTreeMap;
use serde_derive::{Serialize, Deserialize};

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StaResourceTypes {
    pub observation_types: BTreeMap<String, String>,
    pub entities: BTreeMap<String, BTreeMap<String, String>>,
}

fn main() {
    println!("cargo:rerun-if-changed=src/sta_resource_types.json");
    let s = include_str!("./src/sta_resource_types.json");
    let s = serde_json::from_str::<StaResourceTypes>(&s).unwrap();
    uneval::to_out_dir(&s, "sta_resource_types.rs").unwrap();
}
