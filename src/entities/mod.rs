//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod ai_service;
pub mod api_call_log;
pub mod app_setting;
pub mod group;
pub mod invitation_code;
pub mod item;
pub mod prompt_template;
pub mod subscription_config;
pub mod subscription_config_group;
pub mod user;
pub mod user_group;

// Re-export specific types to avoid conflicts
pub use ai_service::{Column as AiServiceColumn, Entity as AiService, Model as AiServiceModel};
pub use api_call_log::{
    Column as ApiCallLogColumn, Entity as ApiCallLog, Model as ApiCallLogModel,
};
pub use app_setting::{Column as AppSettingColumn, Entity as AppSetting, Model as AppSettingModel};
pub use group::{Column as GroupColumn, Entity as Group, Model as GroupModel};
pub use invitation_code::{
    Column as InvitationCodeColumn, Entity as InvitationCode, Model as InvitationCodeModel,
};
pub use item::{Column as ItemColumn, Entity as Item, Model as ItemModel};
pub use prompt_template::{
    Column as PromptTemplateColumn, Entity as PromptTemplate, Model as PromptTemplateModel,
};
pub use subscription_config::{
    Column as SubscriptionConfigColumn, Entity as SubscriptionConfig,
    Model as SubscriptionConfigModel,
};
pub use subscription_config_group::{
    Column as SubscriptionConfigGroupColumn, Entity as SubscriptionConfigGroup,
};
pub use user::{Column as UserColumn, Entity as User, Model as UserModel};
pub use user_group::{Column as UserGroupColumn, Entity as UserGroup};
