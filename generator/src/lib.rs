// emg — Environment Model Generator
//
// Library root. Generation phases are added as modules here.

pub mod analysis;
pub mod calculus;
pub mod config;
pub mod diag;
pub mod error;
pub mod fsa;
pub mod instances;
pub mod interfaces;
pub mod matching;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod signature;
pub mod translator;
