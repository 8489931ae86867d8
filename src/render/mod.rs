//! Turns an [`Envelope`](crate::core::envelope::Envelope) into something a
//! display layer can show without further processing.

pub mod markdown;
pub mod view;

pub use view::RenderedTurn;
