//! On-disk record layout.
//!
//! Every record is a 32-bit header word followed by a kind-specific payload.
//! Payload structs are `#[repr(C)]` with explicit padding so they can be
//! copied straight out of (and into) the byte buffer with `plain`.

use bitfield::bitfield;
use plain::Plain;

/// Size of the header word preceding every payload.
pub const HEADER_SIZE: usize = std::mem::size_of::<u32>();

/// Record kind tags.
pub mod kind {
    pub const TEAM_ADDED: u8 = 0;
    pub const TEAM_REMOVED: u8 = 1;
    pub const THREAD_ADDED: u8 = 2;
    pub const THREAD_REMOVED: u8 = 3;
    pub const THREAD_SCHEDULED: u8 = 4;
    pub const THREAD_ENQUEUED_IN_RUN_QUEUE: u8 = 5;
    pub const THREAD_REMOVED_FROM_RUN_QUEUE: u8 = 6;
    pub const WAIT_OBJECT_INFO: u8 = 7;
    pub const IO_SCHEDULER_ADDED: u8 = 8;
    pub const IO_REQUEST_SCHEDULED: u8 = 9;
    pub const IO_REQUEST_FINISHED: u8 = 10;
    pub const IO_OPERATION_STARTED: u8 = 11;
    pub const IO_OPERATION_FINISHED: u8 = 12;
}

bitfield! {
    /// Packed record header: kind, CPU and payload size.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct RecordHeader(u32);
    impl Debug;
    pub u8, kind, set_kind: 7, 0;
    pub u8, cpu, set_cpu: 15, 8;
    pub u16, size, set_size: 31, 16;
}

impl RecordHeader {
    pub fn new(kind: u8, cpu: u8, size: u16) -> Self {
        let mut header = RecordHeader(0);
        header.set_kind(kind);
        header.set_cpu(cpu);
        header.set_size(size);
        header
    }

    /// Read a header from the start of `bytes`, if there are enough of them.
    pub fn read(bytes: &[u8]) -> Option<Self> {
        let word: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(RecordHeader(u32::from_ne_bytes(word)))
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        self.0.to_ne_bytes()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeamAddedRecord {
    pub team: i32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeamRemovedRecord {
    pub team: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadAddedRecord {
    pub team: i32,
    pub thread: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadRemovedRecord {
    pub team: i32,
    pub thread: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadScheduledRecord {
    pub time: i64,
    pub thread: i32,
    pub previous_thread: i32,
    pub previous_thread_state: u16,
    pub previous_thread_wait_object_type: u16,
    pub _pad: u32,
    pub previous_thread_wait_object: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadEnqueuedRecord {
    pub time: i64,
    pub thread: i32,
    pub priority: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadDequeuedRecord {
    pub time: i64,
    pub thread: i32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WaitObjectInfoRecord {
    pub kind: u32,
    pub _pad: u32,
    pub object: u64,
    pub referenced_object: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoSchedulerAddedRecord {
    pub scheduler: i32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoRequestScheduledRecord {
    pub time: i64,
    pub team: i32,
    pub thread: i32,
    pub scheduler: i32,
    pub flags: u32,
    pub request: u64,
    pub offset: i64,
    pub length: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoRequestFinishedRecord {
    pub time: i64,
    pub scheduler: i32,
    pub status: i32,
    pub request: u64,
    pub transferred: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoOperationStartedRecord {
    pub time: i64,
    pub scheduler: i32,
    pub flags: u32,
    pub request: u64,
    pub operation: u64,
    pub offset: i64,
    pub length: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoOperationFinishedRecord {
    pub time: i64,
    pub scheduler: i32,
    pub status: i32,
    pub request: u64,
    pub operation: u64,
    pub transferred: u64,
}

/// I/O flag bit marking a write.
pub const IO_FLAG_WRITE: u32 = 1;

// SAFETY: all payload structs are repr(C), made of integers only and laid
// out without implicit padding, so every bit pattern is a valid value.
unsafe impl Plain for TeamAddedRecord {}
unsafe impl Plain for TeamRemovedRecord {}
unsafe impl Plain for ThreadAddedRecord {}
unsafe impl Plain for ThreadRemovedRecord {}
unsafe impl Plain for ThreadScheduledRecord {}
unsafe impl Plain for ThreadEnqueuedRecord {}
unsafe impl Plain for ThreadDequeuedRecord {}
unsafe impl Plain for WaitObjectInfoRecord {}
unsafe impl Plain for IoSchedulerAddedRecord {}
unsafe impl Plain for IoRequestScheduledRecord {}
unsafe impl Plain for IoRequestFinishedRecord {}
unsafe impl Plain for IoOperationStartedRecord {}
unsafe impl Plain for IoOperationFinishedRecord {}

/// Copy a fixed payload out of `bytes`, returning it with the trailing bytes.
pub fn read_payload<T: Plain + Default>(bytes: &[u8]) -> Option<(T, &[u8])> {
    let mut record = T::default();
    plain::copy_from_bytes(&mut record, bytes).ok()?;
    Some((record, &bytes[std::mem::size_of::<T>()..]))
}

/// View a payload struct as raw bytes for encoding.
pub fn payload_bytes<T: Plain>(record: &T) -> &[u8] {
    // SAFETY: T is Plain and padding-free (see the impls above), so every
    // byte of the value is initialized.
    unsafe { plain::as_bytes(record) }
}
