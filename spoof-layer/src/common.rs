use std::ffi::c_char;

use ash::vk;

#[derive(thiserror::Error, Debug)]
pub enum LayerError {
    #[error("Loader did not pass a layer link in the create info chain")]
    MissingLayerLink,
    #[error("Next layer in the chain does not provide {0}")]
    MissingEntryPoint(&'static str),
    #[error("Unable to reserve device records: {0}")]
    OutOfHostMemory(#[from] indexmap::TryReserveError),
    #[error("Next layer in the chain failed: {0}")]
    Vk(#[from] vk::Result),
}

impl From<LayerError> for vk::Result {
    fn from(err: LayerError) -> Self {
        match err {
            LayerError::MissingLayerLink | LayerError::MissingEntryPoint(_) => {
                vk::Result::ERROR_INITIALIZATION_FAILED
            }
            LayerError::OutOfHostMemory(_) => vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            LayerError::Vk(result) => result,
        }
    }
}

/// Builds a nul-terminated fixed-size C string at compile time.
/// Input longer than `N - 1` bytes is cut off.
pub const fn c_char_array<const N: usize>(s: &str) -> [c_char; N] {
    let bytes = s.as_bytes();
    let mut out = [0 as c_char; N];
    let mut i = 0;
    while i < bytes.len() && i + 1 < N {
        out[i] = bytes[i] as c_char;
        i += 1;
    }
    out
}

/// Copies `s` into a fixed-size C string buffer, truncating on a UTF-8 boundary so that
/// the terminator always fits. Returns `false` if the value had to be truncated.
pub fn write_c_str(dst: &mut [c_char], s: &str) -> bool {
    let mut len = s.len().min(dst.len().saturating_sub(1));
    while !s.is_char_boundary(len) {
        len -= 1;
    }

    for (d, b) in dst.iter_mut().zip(&s.as_bytes()[..len]) {
        *d = *b as c_char;
    }
    dst[len..].fill(0);
    len == s.len()
}

/// Reads a fixed-size C string buffer up to its terminator.
pub fn read_c_str(src: &[c_char]) -> String {
    let bytes: Vec<u8> = src
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
