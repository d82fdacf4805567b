mod instruction;
mod lower;

pub use instruction::{Instruction, InstructionSet, Slot};
pub use lower::{lower_expression, lower_function, LoweringError};
