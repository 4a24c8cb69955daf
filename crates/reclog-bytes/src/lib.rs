//! Byte I/O layer: a zero-copy cursor protocol over flat memory, fragmented
//! chains, memory-mapped files and file descriptors.
//!
//! The three traits ([`Reader`], [`Writer`], [`BackwardWriter`]) expose an
//! in-memory window for the hot path and fallible refill/flush operations
//! for the slow path. Record and chunk layers are written purely against
//! the traits, so any backend combination works.

pub mod backward_writer;
pub mod chain_backward_writer;
pub mod chain_reader;
pub mod chain_writer;
pub mod fd_reader;
pub mod fd_writer;
pub mod limiting_backward_writer;
pub mod mmap_reader;
pub mod reader;
pub mod slice_reader;
pub mod varint_io;
pub mod vec_writer;
pub mod writer;

pub use backward_writer::BackwardWriter;
pub use chain_backward_writer::ChainBackwardWriter;
pub use chain_reader::ChainReader;
pub use chain_writer::ChainWriter;
pub use fd_reader::{FdReader, FdReaderOptions};
pub use fd_writer::{FdWriter, FdWriterOptions};
pub use limiting_backward_writer::LimitingBackwardWriter;
pub use mmap_reader::MmapReader;
pub use reader::Reader;
pub use slice_reader::SliceReader;
pub use vec_writer::VecWriter;
pub use writer::{FlushType, Writer, MAX_BYTES_TO_COPY};
