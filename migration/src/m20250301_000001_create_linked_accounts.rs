use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LinkedAccount::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LinkedAccount::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LinkedAccount::UserId).string().not_null())
                    .col(ColumnDef::new(LinkedAccount::Provider).string().not_null())
                    .col(
                        ColumnDef::new(LinkedAccount::AccessToken)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LinkedAccount::RefreshToken).string())
                    .col(
                        ColumnDef::new(LinkedAccount::TokenExpiry)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LinkedAccount::Scopes)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(LinkedAccount::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LinkedAccount::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One linked account per (user, provider)
        manager
            .create_index(
                Index::create()
                    .name("idx_linked_accounts_user_provider")
                    .table(LinkedAccount::Table)
                    .col(LinkedAccount::UserId)
                    .col(LinkedAccount::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LinkedAccount::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum LinkedAccount {
    #[sea_orm(iden = "linked_accounts")]
    Table,
    Id,
    UserId,
    Provider,
    AccessToken,
    RefreshToken,
    TokenExpiry,
    Scopes,
    CreatedAt,
    UpdatedAt,
}
