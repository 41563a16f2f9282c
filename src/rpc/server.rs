//! RPC server: one task per connection, request/response frames, plus the
//! market-data streaming call.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{read_frame, write_frame};
use super::{RpcCall, RpcCode, RpcFault, RpcReply, RpcRequest, RpcResponse};
use crate::auth::AuthService;
use crate::market_data::MarketDataSource;
use crate::order::service::{CancelOutcome, OrderService};
use crate::portfolio::PortfolioService;

pub struct RpcServer {
    auth: Arc<AuthService>,
    orders: Arc<OrderService>,
    portfolio: Arc<PortfolioService>,
    market_data: Arc<dyn MarketDataSource>,
}

impl RpcServer {
    pub fn new(
        auth: Arc<AuthService>,
        orders: Arc<OrderService>,
        portfolio: Arc<PortfolioService>,
        market_data: Arc<dyn MarketDataSource>,
    ) -> Self {
        Self {
            auth,
            orders,
            portfolio,
            market_data,
        }
    }

    pub async fn serve(self: Arc<Self>, port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "RPC server listening");

        loop {
            let stream = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "RPC connection accepted");
                        stream
                    }
                    Err(e) => {
                        warn!(error = %e, "RPC accept failed");
                        continue;
                    }
                },
            };
            let server = self.clone();
            let conn_cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, conn_cancel).await {
                    debug!(error = %e, "RPC connection closed with error");
                }
            });
        }
        info!("RPC server stopped");
        Ok(())
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = BufWriter::new(write_half);

        loop {
            let request: Option<RpcRequest> = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = read_frame(&mut reader) => frame?,
            };
            let Some(request) = request else { break };

            let user = match self.auth.verify(&request.token) {
                Ok(user) => user,
                Err(e) => {
                    let response = RpcResponse {
                        id: request.id,
                        result: Err(RpcFault {
                            code: RpcCode::Unauthenticated,
                            message: e.to_string(),
                        }),
                    };
                    write_frame(&mut writer, &response).await?;
                    continue;
                }
            };

            match request.call {
                RpcCall::StreamMarketData { symbols, interval_ms } => {
                    self.stream_market_data(
                        &mut writer,
                        request.id,
                        symbols,
                        interval_ms,
                        &cancel,
                    )
                    .await?;
                    // The stream owns the connection until the peer leaves.
                    break;
                }
                call => {
                    let result = self.dispatch(user.user_id, call).await;
                    let response = RpcResponse {
                        id: request.id,
                        result,
                    };
                    write_frame(&mut writer, &response).await?;
                }
            }
        }
        writer.shutdown().await.ok();
        Ok(())
    }

    async fn dispatch(
        &self,
        user_id: uuid::Uuid,
        call: RpcCall,
    ) -> Result<RpcReply, RpcFault> {
        match call {
            RpcCall::GetPositions => self
                .portfolio
                .list_positions(user_id)
                .await
                .map(RpcReply::Positions)
                .map_err(|e| internal(&e.to_string())),
            RpcCall::GetPositionAggregation => self
                .portfolio
                .aggregation(user_id)
                .await
                .map(RpcReply::PositionAggregation)
                .map_err(|e| internal(&e.to_string())),
            RpcCall::Submit(cmd) => self
                .orders
                .submit(user_id, cmd)
                .await
                .map(|receipt| RpcReply::OrderAccepted {
                    order_id: receipt.order.id,
                    status: receipt.order.status,
                })
                .map_err(order_fault),
            RpcCall::GetStatus { order_id } => self
                .orders
                .get(user_id, order_id)
                .await
                .map(|order| RpcReply::OrderStatus {
                    order_id: order.id,
                    status: order.status,
                })
                .map_err(order_fault),
            RpcCall::Cancel { order_id } => self
                .orders
                .cancel(user_id, order_id)
                .await
                .map(|outcome| {
                    let order = match outcome {
                        CancelOutcome::Cancelled(order) => order,
                        CancelOutcome::AlreadyTerminal(order) => order,
                    };
                    RpcReply::OrderCancelled {
                        order_id: order.id,
                        status: order.status,
                    }
                })
                .map_err(order_fault),
            RpcCall::GetMarketData { symbols } => self
                .market_data
                .get(&symbols)
                .await
                .map(RpcReply::MarketData)
                .map_err(|e| RpcFault {
                    code: RpcCode::Unavailable,
                    message: e.to_string(),
                }),
            RpcCall::StreamMarketData { .. } => Err(internal("stream handled upstream")),
        }
    }

    async fn stream_market_data(
        &self,
        writer: &mut BufWriter<OwnedWriteHalf>,
        request_id: u64,
        symbols: Vec<String>,
        interval_ms: u64,
        cancel: &CancellationToken,
    ) -> std::io::Result<()> {
        let interval = Duration::from_millis(interval_ms.clamp(100, 60_000));
        info!(count = symbols.len(), interval_ms = interval.as_millis() as u64, "Market-data stream opened");

        loop {
            let entries = match self.market_data.get(&symbols).await {
                Ok(entries) => entries,
                Err(e) => {
                    let response = RpcResponse {
                        id: request_id,
                        result: Err(RpcFault {
                            code: RpcCode::Unavailable,
                            message: e.to_string(),
                        }),
                    };
                    write_frame(writer, &response).await?;
                    // Transient upstream failure ends the stream; the
                    // client reconnects with backoff.
                    return Ok(());
                }
            };

            let response = RpcResponse {
                id: request_id,
                result: Ok(RpcReply::MarketDataTick(entries)),
            };
            if let Err(e) = write_frame(writer, &response).await {
                debug!(error = %e, "Stream consumer went away");
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

fn order_fault(err: crate::order::error::OrderError) -> RpcFault {
    let code = RpcCode::from(&err);
    let message = if code == RpcCode::Internal {
        error!(error = %err, "RPC order call failed");
        "internal error".to_string()
    } else {
        err.to_string()
    };
    RpcFault { code, message }
}

fn internal(message: &str) -> RpcFault {
    error!(message, "RPC internal failure");
    RpcFault {
        code: RpcCode::Internal,
        message: "internal error".to_string(),
    }
}
