// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod commit;
pub mod prepare;
pub mod rollback;
pub mod run;
pub mod status;

pub use commit::commit_command;
pub use prepare::prepare_command;
pub use rollback::rollback_command;
pub use run::run_command;
pub use status::status_command;
