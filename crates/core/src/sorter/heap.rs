//! Binary heap operations over slices with a caller-supplied ordering.
//!
//! `less(a, b)` orders the heap so that the greatest element sits at index 0.
//! Passing a "greater" function instead yields a min-heap. Unlike
//! [`std::collections::BinaryHeap`] the ordering may depend on runtime state,
//! such as a user comparator.

fn sift_up<T>(data: &mut [T], mut child: usize, less: &mut impl FnMut(&T, &T) -> bool) {
	while child > 0 {
		let parent = (child - 1) / 2;
		if !less(&data[parent], &data[child]) {
			break;
		}
		data.swap(parent, child);
		child = parent;
	}
}

fn sift_down<T>(data: &mut [T], mut parent: usize, less: &mut impl FnMut(&T, &T) -> bool) {
	let len = data.len();
	loop {
		let mut child = 2 * parent + 1;
		if child >= len {
			break;
		}
		if child + 1 < len && less(&data[child], &data[child + 1]) {
			child += 1;
		}
		if !less(&data[parent], &data[child]) {
			break;
		}
		data.swap(parent, child);
		parent = child;
	}
}

/// Arranges the slice into a heap.
pub(crate) fn make_heap<T>(data: &mut [T], mut less: impl FnMut(&T, &T) -> bool) {
	for i in (0..data.len() / 2).rev() {
		sift_down(data, i, &mut less);
	}
}

/// Pushes a value onto the heap.
pub(crate) fn push_heap<T>(data: &mut Vec<T>, value: T, mut less: impl FnMut(&T, &T) -> bool) {
	data.push(value);
	let last = data.len() - 1;
	sift_up(data, last, &mut less);
}

/// Removes and returns the top of the heap.
pub(crate) fn pop_heap<T>(data: &mut Vec<T>, mut less: impl FnMut(&T, &T) -> bool) -> Option<T> {
	if data.is_empty() {
		return None;
	}
	let top = data.swap_remove(0);
	sift_down(data, 0, &mut less);
	Some(top)
}

/// Restores the heap after the top element was replaced in place.
pub(crate) fn replace_top<T>(data: &mut [T], less: impl FnMut(&T, &T) -> bool) {
	let mut less = less;
	sift_down(data, 0, &mut less);
}

/// Turns a heap into a slice sorted in ascending order.
pub(crate) fn sort_heap<T>(data: &mut [T], mut less: impl FnMut(&T, &T) -> bool) {
	for end in (1..data.len()).rev() {
		data.swap(0, end);
		sift_down(&mut data[..end], 0, &mut less);
	}
}
