//! Table and index definitions.
//!
//! Decimals are stored as TEXT (lossless round-trip through
//! `rust_decimal`), timestamps as RFC 3339 TEXT, JSON blobs as TEXT.

use rusqlite::Connection;

pub fn create_all(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            wallet_address TEXT UNIQUE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS api_keys (
            id INTEGER PRIMARY KEY,
            provider TEXT NOT NULL UNIQUE,
            api_key TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS councils (
            id INTEGER PRIMARY KEY,
            user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            is_system INTEGER NOT NULL DEFAULT 0,
            is_public INTEGER NOT NULL DEFAULT 0,
            is_template INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            agents TEXT NOT NULL,
            connections TEXT NOT NULL,
            trading_mode TEXT NOT NULL DEFAULT 'paper'
                CHECK (trading_mode IN ('paper', 'real')),
            trading_type TEXT NOT NULL DEFAULT 'futures'
                CHECK (trading_type IN ('futures', 'spot')),
            initial_capital TEXT NOT NULL,
            available_balance TEXT NOT NULL,
            used_balance TEXT NOT NULL DEFAULT '0',
            total_account_value TEXT NOT NULL,
            total_margin_used TEXT NOT NULL DEFAULT '0',
            total_unrealized_profit TEXT NOT NULL DEFAULT '0',
            total_realized_pnl TEXT NOT NULL DEFAULT '0',
            net_pnl TEXT NOT NULL DEFAULT '0',
            total_fees TEXT NOT NULL DEFAULT '0',
            total_funding_fees TEXT NOT NULL DEFAULT '0',
            open_futures_count INTEGER NOT NULL DEFAULT 0,
            closed_futures_count INTEGER NOT NULL DEFAULT 0,
            active_spot_holdings INTEGER NOT NULL DEFAULT 0,
            average_leverage TEXT NOT NULL DEFAULT '0',
            average_confidence TEXT NOT NULL DEFAULT '0',
            biggest_win TEXT NOT NULL DEFAULT '0',
            biggest_loss TEXT NOT NULL DEFAULT '0',
            long_hold_pct TEXT NOT NULL DEFAULT '0',
            short_hold_pct TEXT NOT NULL DEFAULT '0',
            flat_hold_pct TEXT NOT NULL DEFAULT '100',
            current_capital TEXT,
            total_pnl TEXT,
            total_pnl_percentage TEXT,
            win_rate TEXT,
            total_trades INTEGER NOT NULL DEFAULT 0,
            forked_from_id INTEGER REFERENCES councils(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_executed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_councils_system_active
            ON councils(is_system, is_active);

        CREATE TABLE IF NOT EXISTS council_wallets (
            id INTEGER PRIMARY KEY,
            council_id INTEGER NOT NULL UNIQUE
                REFERENCES councils(id) ON DELETE CASCADE,
            exchange TEXT NOT NULL,
            api_key TEXT NOT NULL,
            secret_key TEXT NOT NULL,
            contract_address TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS futures_positions (
            id INTEGER PRIMARY KEY,
            council_id INTEGER NOT NULL
                REFERENCES councils(id) ON DELETE CASCADE,
            symbol TEXT NOT NULL,
            position_side TEXT NOT NULL
                CHECK (position_side IN ('LONG', 'SHORT', 'BOTH')),
            position_amt TEXT NOT NULL,
            entry_price TEXT NOT NULL,
            mark_price TEXT,
            liquidation_price TEXT,
            leverage INTEGER NOT NULL DEFAULT 1 CHECK (leverage >= 1),
            margin_type TEXT NOT NULL
                CHECK (margin_type IN ('ISOLATED', 'CROSSED')),
            isolated_margin TEXT,
            notional TEXT,
            unrealized_profit TEXT,
            realized_pnl TEXT,
            fees_paid TEXT NOT NULL DEFAULT '0',
            funding_fees TEXT NOT NULL DEFAULT '0',
            confidence TEXT,
            agent_reasoning TEXT,
            platform TEXT NOT NULL,
            trading_mode TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('OPEN', 'CLOSED', 'LIQUIDATED')),
            opened_at TEXT NOT NULL,
            closed_at TEXT,
            stop_loss_price TEXT,
            stop_loss_order_id TEXT,
            take_profit_short TEXT,
            take_profit_short_order_id TEXT,
            take_profit_mid TEXT,
            take_profit_mid_order_id TEXT,
            take_profit_long TEXT,
            take_profit_long_order_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_futures_positions_council_status
            ON futures_positions(council_id, status, opened_at DESC);
        CREATE INDEX IF NOT EXISTS idx_futures_positions_lookup
            ON futures_positions(council_id, symbol, position_side, status);

        CREATE TABLE IF NOT EXISTS spot_holdings (
            id INTEGER PRIMARY KEY,
            council_id INTEGER NOT NULL
                REFERENCES councils(id) ON DELETE CASCADE,
            symbol TEXT NOT NULL,
            base_asset TEXT NOT NULL,
            quote_asset TEXT NOT NULL,
            free TEXT NOT NULL,
            locked TEXT NOT NULL DEFAULT '0',
            total TEXT NOT NULL,
            average_cost TEXT NOT NULL,
            total_cost TEXT NOT NULL,
            current_price TEXT,
            current_value TEXT,
            unrealized_pnl TEXT,
            platform TEXT NOT NULL,
            trading_mode TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'ACTIVE'
                CHECK (status IN ('ACTIVE', 'CLOSED')),
            first_acquired_at TEXT NOT NULL,
            closed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_spot_holdings_council_status
            ON spot_holdings(council_id, status);
        CREATE INDEX IF NOT EXISTS idx_spot_holdings_lookup
            ON spot_holdings(council_id, symbol, platform, trading_mode);

        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY,
            council_id INTEGER NOT NULL
                REFERENCES councils(id) ON DELETE CASCADE,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
            order_type TEXT NOT NULL,
            position_side TEXT,
            orig_qty TEXT NOT NULL,
            executed_qty TEXT NOT NULL DEFAULT '0',
            price TEXT,
            stop_price TEXT,
            avg_price TEXT,
            status TEXT NOT NULL,
            commission TEXT,
            commission_asset TEXT,
            futures_position_id INTEGER
                REFERENCES futures_positions(id) ON DELETE SET NULL,
            spot_holding_id INTEGER
                REFERENCES spot_holdings(id) ON DELETE SET NULL,
            external_order_id TEXT,
            platform TEXT NOT NULL,
            trading_mode TEXT NOT NULL,
            trading_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_council_created
            ON orders(council_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS council_runs (
            id INTEGER PRIMARY KEY,
            council_id INTEGER NOT NULL
                REFERENCES councils(id) ON DELETE CASCADE,
            user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
            trading_mode TEXT NOT NULL,
            symbols TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'IDLE',
            started_at TEXT,
            completed_at TEXT,
            run_number INTEGER NOT NULL DEFAULT 1,
            request_data TEXT,
            results TEXT,
            error_message TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_council_runs_council_status
            ON council_runs(council_id, status);

        CREATE TABLE IF NOT EXISTS council_run_cycles (
            id INTEGER PRIMARY KEY,
            council_run_id INTEGER NOT NULL
                REFERENCES council_runs(id) ON DELETE CASCADE,
            cycle_number INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'IN_PROGRESS',
            started_at TEXT NOT NULL,
            completed_at TEXT,
            analyst_signals TEXT,
            trading_decisions TEXT,
            executed_trades TEXT,
            portfolio_snapshot TEXT,
            performance_metrics TEXT,
            trigger_reason TEXT,
            llm_calls_count INTEGER NOT NULL DEFAULT 0,
            api_calls_count INTEGER NOT NULL DEFAULT 0,
            estimated_cost TEXT,
            error_message TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_council_run_cycles_run
            ON council_run_cycles(council_run_id, cycle_number);

        CREATE TABLE IF NOT EXISTS consensus_decisions (
            id INTEGER PRIMARY KEY,
            council_id INTEGER NOT NULL
                REFERENCES councils(id) ON DELETE CASCADE,
            council_run_id INTEGER
                REFERENCES council_runs(id) ON DELETE CASCADE,
            council_run_cycle_id INTEGER
                REFERENCES council_run_cycles(id) ON DELETE CASCADE,
            symbol TEXT NOT NULL,
            decision TEXT NOT NULL CHECK (decision IN ('BUY', 'SELL', 'HOLD')),
            confidence TEXT NOT NULL,
            votes_buy INTEGER NOT NULL DEFAULT 0,
            votes_sell INTEGER NOT NULL DEFAULT 0,
            votes_hold INTEGER NOT NULL DEFAULT 0,
            total_votes INTEGER NOT NULL DEFAULT 0,
            agent_votes TEXT NOT NULL,
            threshold TEXT NOT NULL,
            reasoning TEXT,
            market_price TEXT,
            market_conditions TEXT,
            was_executed INTEGER NOT NULL DEFAULT 0,
            executed_order_id INTEGER
                REFERENCES orders(id) ON DELETE SET NULL,
            execution_reason TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_consensus_decisions_council
            ON consensus_decisions(council_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS agent_debate_messages (
            id INTEGER PRIMARY KEY,
            council_id INTEGER NOT NULL
                REFERENCES councils(id) ON DELETE CASCADE,
            agent_name TEXT NOT NULL,
            message TEXT NOT NULL,
            message_type TEXT NOT NULL,
            sentiment TEXT NOT NULL,
            market_symbol TEXT,
            confidence TEXT,
            debate_round INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_agent_debate_messages_council
            ON agent_debate_messages(council_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS pnl_snapshots (
            id INTEGER PRIMARY KEY,
            council_id INTEGER NOT NULL
                REFERENCES councils(id) ON DELETE CASCADE,
            futures_position_id INTEGER
                REFERENCES futures_positions(id) ON DELETE CASCADE,
            spot_holding_id INTEGER
                REFERENCES spot_holdings(id) ON DELETE CASCADE,
            snapshot_time TEXT NOT NULL,
            mark_price TEXT NOT NULL,
            notional_value TEXT NOT NULL,
            unrealized_pnl TEXT NOT NULL,
            pnl_percentage TEXT NOT NULL,
            liquidation_distance_pct TEXT,
            margin_ratio TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_pnl_snapshots_council_time
            ON pnl_snapshots(council_id, snapshot_time);

        CREATE TABLE IF NOT EXISTS council_performance_snapshots (
            id INTEGER PRIMARY KEY,
            council_id INTEGER NOT NULL
                REFERENCES councils(id) ON DELETE CASCADE,
            snapshot_time TEXT NOT NULL,
            total_value TEXT NOT NULL,
            pnl TEXT NOT NULL,
            pnl_percentage TEXT NOT NULL,
            win_rate TEXT NOT NULL,
            total_trades INTEGER NOT NULL DEFAULT 0,
            open_positions INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_performance_snapshots_council_time
            ON council_performance_snapshots(council_id, snapshot_time);
        CREATE INDEX IF NOT EXISTS idx_performance_snapshots_time
            ON council_performance_snapshots(snapshot_time);
        ",
    )
}
