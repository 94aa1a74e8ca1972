use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub enum HeatFlowError {
    Input(String),
    Mesher(String),
    Solver(String),
    PostProcessor(String),
}

impl Display for HeatFlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (err_name, value) = match self {
            HeatFlowError::Input(v) => ("Input", v),
            HeatFlowError::Mesher(v) => ("Mesher", v),
            HeatFlowError::Solver(v) => ("Solver", v),
            HeatFlowError::PostProcessor(v) => ("Post Processor", v),
        };

        write!(f, "{} error: {}", err_name, value)
    }
}

impl std::error::Error for HeatFlowError {}
