/// Counters describing the work done by a single sorter.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SorterStats {
	/// The number of records accepted by `add`
	pub num_sorted: u64,
	/// The number of bytes of records accepted by `add`
	pub bytes_sorted: u64,
	/// The number of sorted runs written to disk
	pub spilled_ranges: u64,
	/// The number of records written to disk
	pub spilled_key_values: u64,
	/// The number of bytes currently held in memory
	pub mem_usage: usize,
}

impl SorterStats {
	pub(crate) fn increment_num_sorted(&mut self, n: u64) {
		self.num_sorted += n;
	}

	pub(crate) fn increment_bytes_sorted(&mut self, n: u64) {
		self.bytes_sorted += n;
	}

	pub(crate) fn add_mem_usage(&mut self, n: usize) {
		self.mem_usage += n;
	}

	pub(crate) fn sub_mem_usage(&mut self, n: usize) {
		self.mem_usage = self.mem_usage.saturating_sub(n);
	}

	pub(crate) fn set_mem_usage(&mut self, n: usize) {
		self.mem_usage = n;
	}

	pub(crate) fn reset_mem_usage(&mut self) {
		self.mem_usage = 0;
	}
}
