//! Setting → configuration key tables

/// Comment written above every generated setting
pub const GENERATED_COMMENT: &str = "# DO NOT CHANGE - this file was generated by mongo-provision";

/// Ops Manager settings written by the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpsManagerSetting {
    /// Application database connection string (`conf-mms.properties`)
    MongoUri,
    /// Public URL of the console (`conf-mms.properties`)
    CentralUrl,
    /// HTTP port (`mms.conf`)
    Port,
}

impl OpsManagerSetting {
    pub const fn key(self) -> &'static str {
        match self {
            OpsManagerSetting::MongoUri => "mongo.mongoUri",
            OpsManagerSetting::CentralUrl => "mms.centralUrl",
            OpsManagerSetting::Port => "BASE_PORT",
        }
    }
}

/// Automation agent settings written to `local.config`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSetting {
    GroupId,
    ApiKey,
    BaseUrl,
}

impl AgentSetting {
    pub const fn key(self) -> &'static str {
        match self {
            AgentSetting::GroupId => "mmsGroupId",
            AgentSetting::ApiKey => "mmsApiKey",
            AgentSetting::BaseUrl => "mmsBaseUrl",
        }
    }
}
