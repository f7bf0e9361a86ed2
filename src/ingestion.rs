use std::io::Read;
use std::pin::Pin;

use futures::stream::{self, Stream};
use serde::Deserialize;

use crate::domain::traits::CommandStream;
use crate::domain::{Error, LedgerCommand, Money, UserId};

pub struct CsvReader<R: Read> {
    reader: Option<csv::Reader<R>>,
}

impl<R: Read> CsvReader<R> {
    pub fn new(reader: R) -> Result<Self, Error> {
        let rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        Ok(Self { reader: Some(rdr) })
    }
}

/// Internal shape used only for CSV deserialization.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "type")]
    kind: String,
    user: UserId,
    to_user: Option<UserId>,
    amount: Option<Money>,
    comment: Option<String>,
}

impl TryFrom<CsvRow> for LedgerCommand {
    type Error = Error;

    fn try_from(row: CsvRow) -> Result<Self, Self::Error> {
        let kind = row.kind.trim().to_ascii_lowercase();
        let command = match (kind.as_str(), row.to_user, row.amount) {
            ("open", _, _) => LedgerCommand::Open { user_id: row.user },
            ("deposit", _, Some(amount)) => LedgerCommand::Deposit {
                user_id: row.user,
                amount,
                comment: row.comment,
            },
            ("withdraw", _, Some(amount)) => LedgerCommand::Withdraw {
                user_id: row.user,
                amount,
                comment: row.comment,
            },
            ("transfer", Some(to_user_id), Some(amount)) => LedgerCommand::Transfer {
                from_user_id: row.user,
                to_user_id,
                amount,
                comment: row.comment,
            },
            ("deposit" | "withdraw" | "transfer", _, _) => {
                return Err(Error::Ingestion(format!(
                    "Incomplete {} row for user {}",
                    kind, row.user
                )));
            }
            (other, _, _) => {
                return Err(Error::Ingestion(format!(
                    "Invalid command type: {}",
                    other
                )));
            }
        };

        Ok(command)
    }
}

impl<R: Read + Send + 'static> CommandStream for CsvReader<R> {
    type CommandStream = Pin<Box<dyn Stream<Item = Result<LedgerCommand, Error>> + Send>>;

    fn stream(&mut self) -> Self::CommandStream {
        // The stream owns the reader; a second call yields nothing.
        let reader = match self.reader.take() {
            Some(r) => r,
            None => {
                return Box::pin(stream::iter(Vec::<Result<LedgerCommand, Error>>::new()));
            }
        };

        let iter = reader
            .into_deserialize::<CsvRow>()
            .map(|row_res| match row_res {
                Ok(row) => LedgerCommand::try_from(row),
                Err(e) => Err(Error::Ingestion(format!(
                    "CSV deserialization error: {}",
                    e
                ))),
            });

        Box::pin(stream::iter(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(input: &'static str) -> Vec<Result<LedgerCommand, Error>> {
        let mut reader = CsvReader::new(input.as_bytes()).unwrap();
        reader.stream().collect().await
    }

    #[tokio::test]
    async fn parses_every_command_type() {
        let commands = collect(
            "type, user, to_user, amount, comment\n\
             open, 1, , ,\n\
             deposit, 1, , 100.00, salary\n\
             withdraw, 1, , 0.50,\n\
             transfer, 1, 2, 30, \"rent, march\"\n",
        )
        .await;

        let commands: Vec<LedgerCommand> = commands.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(
            commands,
            vec![
                LedgerCommand::Open { user_id: 1 },
                LedgerCommand::Deposit {
                    user_id: 1,
                    amount: Money::from_minor(10_000),
                    comment: Some("salary".to_string()),
                },
                LedgerCommand::Withdraw {
                    user_id: 1,
                    amount: Money::from_minor(50),
                    comment: None,
                },
                LedgerCommand::Transfer {
                    from_user_id: 1,
                    to_user_id: 2,
                    amount: Money::from_minor(3_000),
                    comment: Some("rent, march".to_string()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn bad_rows_surface_as_ingestion_errors() {
        let commands = collect(
            "type, user, to_user, amount, comment\n\
             refund, 1, , 1.00,\n\
             transfer, 1, , 1.00,\n\
             deposit, 1, , 1.001,\n\
             deposit, 1, , 2.00,\n",
        )
        .await;

        assert_eq!(commands.len(), 4);
        assert!(matches!(commands[0], Err(Error::Ingestion(_))));
        assert!(matches!(commands[1], Err(Error::Ingestion(_))));
        assert!(matches!(commands[2], Err(Error::Ingestion(_))));
        assert!(commands[3].is_ok());
    }

    #[tokio::test]
    async fn second_stream_is_empty() {
        let mut reader =
            CsvReader::new("type,user,to_user,amount,comment\nopen,1,,,\n".as_bytes()).unwrap();
        assert_eq!(reader.stream().count().await, 1);
        assert_eq!(reader.stream().count().await, 0);
    }
}
