#![allow(dead_code)]
#![allow(unused_imports)]
#![allow(unused_variables)]
#![allow(non_camel_case_types)]

use x86_decode_core::utils::zextract;

/// Receives the index of the entry matched by [`TableDecode`].
pub trait SelectEntry {
    type Error;

    fn select_entry(&mut self, index: usize);
}

include!(concat!(env!("OUT_DIR"), "/generated_decode.rs"));
