#[cfg(feature = "decoder")]
pub(crate) use decoder::CeltDecoder;

#[cfg(feature = "decoder")]
mod decoder;
mod bands;
pub(crate) mod comb_filter;
mod energy;
mod mdct;
mod mode;
mod pvq;
mod quant;
