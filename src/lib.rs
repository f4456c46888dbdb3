pub mod cli;
pub mod fairness;
pub mod k8s;
pub mod pods;
pub mod publish;
pub mod sampler;
pub mod web;
