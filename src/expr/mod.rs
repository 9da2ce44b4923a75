// Expression compiler: text -> typed, hash-consed tree

pub mod arena;
pub mod compiler;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod printer;

pub use arena::{ExprArena, Node, NodeId, ValueType};
pub use compiler::{CompileSettings, Compiler, SymbolTable, DEFAULT_MAX_SET_SIZE};
pub use eval::{evaluate, Value};
pub use printer::print;
