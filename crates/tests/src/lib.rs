//! Cross-module scenarios for the InterFX stage

#[cfg(test)]
mod pipeline_integration;
#[cfg(test)]
mod settings_integration;
