//! Pipeline descriptions and the fixed pipeline state table

pub mod pipeline_config;
pub mod pipeline_table;

pub use pipeline_config::{
    BlendFactor, BlendState, DepthState, FragmentShaderVariant, PipelineDesc, PrimitiveTopology,
};
pub use pipeline_table::PipelineStateTable;
