include!(concat!(env!("OUT_DIR"), "/generated_code.rs"));

impl Code {
    #[cfg(feature = "mnemonic")]
    pub fn mnemonic(&self) -> Mnemonic {
        CODE_MNEMONIC[*self as usize]
    }
}

impl Default for Code {
    fn default() -> Self {
        Self::INVALID
    }
}
