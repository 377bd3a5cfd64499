//! Slack interface for pocketbook.
//!
//! - **Socket Mode** (`socket`) - frame pump with reconnection and acknowledgement
//! - **Payloads** (`payload`) - raw frame decoding and ack encoding
//! - **Slash Commands** (`commands`) - `/pocketbook [text | delete | remove]`
//! - **Button actions** (`actions`) - `delete` and `send` clicks on listed records
//! - **Callbacks** (`callback`) - replies posted to an interaction's `response_url`
//! - **Block Kit** (`blocks`) - record list and error card builders
//!
//! # Architecture
//!
//! ```text
//! socket frame -> decode_frame -> EventDispatcher -> SlashCommandHandler -> RecordStore
//!                                                 -> BlockActionHandler  -> RecordStore
//!                                                                        -> response_url
//!              <- ack { envelope_id, payload? }
//! ```

pub mod actions;
pub mod blocks;
pub mod callback;
pub mod commands;
pub mod events;
pub mod payload;
pub mod socket;
