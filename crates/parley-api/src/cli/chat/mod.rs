//! Interactive `parley chat`.
//!
//! Drives one script session turn by turn from the terminal: the AI message
//! of every call is printed, each submitted line becomes the next user input.
//! Entry point: `loop_runner::run_chat_loop`.

pub mod banner;
pub mod commands;
pub mod input;
pub mod loop_runner;
