// Application layer: dispatch, tool operations and (with `server`) the gRPC surface

pub mod dispatcher;
#[cfg(feature = "server")]
pub mod grpc_service;
#[cfg(feature = "server")]
pub mod mappers;
pub mod portfolio;
pub mod tools;

pub use dispatcher::Dispatcher;
#[cfg(feature = "server")]
pub use grpc_service::OptimizationToolsService;
pub use portfolio::{PortfolioConstraints, PortfolioModel, PortfolioRequest, SectorLimit};
pub use tools::{
    ConvexRequest, CpRequest, CspRequest, ExpressionObjective, LpRequest, Tool, ToolInfo, Tools,
    ValidationReport, TOOLS,
};
