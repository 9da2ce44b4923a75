use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use super::mappers::{self, pb};
use super::tools::{Tools, TOOLS};

/// gRPC service implementation
pub struct OptimizationToolsService {
    tools: Arc<Tools>,
}

impl OptimizationToolsService {
    pub fn new(tools: Arc<Tools>) -> Self {
        Self { tools }
    }
}

fn parse_arguments(arguments_json: &str) -> Result<serde_json::Value, Status> {
    if arguments_json.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    serde_json::from_str(arguments_json)
        .map_err(|e| Status::invalid_argument(format!("arguments are not valid JSON: {e}")))
}

type BatchStream = Pin<Box<dyn Stream<Item = Result<pb::BatchResponse, Status>> + Send>>;

#[tonic::async_trait]
impl pb::optimization_tools_server::OptimizationTools for OptimizationToolsService {
    async fn call_tool(
        &self,
        request: Request<pb::ToolCall>,
    ) -> Result<Response<pb::SolveResponse>, Status> {
        let call = request.into_inner();
        info!(tool = %call.tool, "tool call");

        let arguments = parse_arguments(&call.arguments_json)?;
        let result = self.tools.call(&call.tool, arguments).await;

        Ok(Response::new(mappers::domain_to_proto_result(&result)))
    }

    async fn call_tool_stream(
        &self,
        request: Request<tonic::Streaming<pb::ToolCallChunk>>,
    ) -> Result<Response<pb::SolveResponse>, Status> {
        let mut stream = request.into_inner();

        let mut tool: Option<String> = None;
        let mut arguments_json = String::new();

        // Collect all chunks
        while let Some(chunk) = stream.message().await? {
            if tool.is_none() {
                tool = Some(chunk.tool);
            }
            arguments_json.push_str(&chunk.arguments_fragment);
        }

        let tool = tool.ok_or_else(|| Status::invalid_argument("empty tool call stream"))?;
        info!(tool = %tool, bytes = arguments_json.len(), "streamed tool call");

        let arguments = parse_arguments(&arguments_json)?;
        let result = self.tools.call(&tool, arguments).await;
        Ok(Response::new(mappers::domain_to_proto_result(&result)))
    }

    type SolveBatchStream = BatchStream;

    async fn solve_batch(
        &self,
        request: Request<pb::ToolBatch>,
    ) -> Result<Response<Self::SolveBatchStream>, Status> {
        let calls = request.into_inner().calls;
        info!(calls = calls.len(), "batch");

        // Reject the whole batch before spawning anything if a document is malformed
        let parsed = calls
            .into_iter()
            .map(|call| parse_arguments(&call.arguments_json).map(|args| (call.tool, args)))
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, rx) = mpsc::channel(parsed.len().max(1));
        for (index, (tool, arguments)) in parsed.into_iter().enumerate() {
            let tools = Arc::clone(&self.tools);
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = tools.call(&tool, arguments).await;
                let response = pb::BatchResponse {
                    index: u32::try_from(index).unwrap_or(u32::MAX),
                    response: Some(mappers::domain_to_proto_result(&result)),
                };
                if tx.send(Ok(response)).await.is_err() {
                    warn!(index, "batch client went away");
                }
            });
        }

        Ok(Response::new(Box::pin(ReceiverStream::new(rx)) as BatchStream))
    }

    async fn solve_linear_program(
        &self,
        request: Request<pb::LinearProgram>,
    ) -> Result<Response<pb::SolveResponse>, Status> {
        let program = request.into_inner();
        info!(
            variables = program.objective_coefficients.len(),
            constraints = program.constraints.len(),
            "linear program"
        );

        let lp_request = mappers::proto_to_lp_request(program).map_err(|e| *e)?;
        let result = self.tools.solve_linear_programming(lp_request).await;

        Ok(Response::new(mappers::domain_to_proto_result(&result)))
    }

    async fn validate_problem(
        &self,
        request: Request<pb::ToolCall>,
    ) -> Result<Response<pb::ValidationResult>, Status> {
        let call = request.into_inner();
        let arguments = parse_arguments(&call.arguments_json)?;
        let report = self.tools.validate(&call.tool, arguments);
        Ok(Response::new(mappers::domain_to_proto_report(report)))
    }

    async fn list_tools(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::ToolList>, Status> {
        let tools = TOOLS.iter().map(mappers::domain_to_proto_tool).collect();
        Ok(Response::new(pb::ToolList { tools }))
    }
}
