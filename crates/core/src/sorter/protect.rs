use std::fmt::Debug;

use anyhow::Result;

/// A hook which transforms every spilled chunk on its way to and from disk,
/// for example to encrypt temporary data at rest.
///
/// `protect_tmp_data` may grow a chunk by up to
/// `additional_bytes_for_protected_buffer` bytes, and
/// `unprotect_tmp_data` must restore the original bytes exactly.
pub trait TmpDataProtector: Debug + Send + Sync {
	/// The extra space a protected chunk may need over its plain size
	fn additional_bytes_for_protected_buffer(&self) -> usize {
		0
	}
	/// Writes the protected form of `input` into `output`, returning its length
	fn protect_tmp_data(&self, input: &[u8], output: &mut [u8]) -> Result<usize>;
	/// Writes the plain form of `input` into `output`, returning its length
	fn unprotect_tmp_data(&self, input: &[u8], output: &mut [u8]) -> Result<usize>;
}
