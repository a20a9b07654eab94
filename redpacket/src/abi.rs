// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Generated bindings for the HappyRedPacket contract and the ERC20
//! surface it needs

use ethers::contract::abigen;

abigen!(
    HappyRedPacket,
    r#"[
        function create_red_packet(bytes32 _hash, uint _number, bool _ifrandom, uint _duration, bytes32 _seed, string _message, string _name, uint _token_type, address _token_addr, uint _total_tokens) payable
        function claim(bytes32 id, string password, address _recipient, bytes32 validation) returns (uint claimed)
        function refund(bytes32 id)
        function check_availability(bytes32 id) view returns (address token_address, uint balance, uint total, uint claimed, bool expired, bool ifclaimed)
        function check_claimed_list(bytes32 id) view returns (address[])
        event CreationSuccess(uint total, bytes32 id, address creator, uint creation_time, address token_address)
        event ClaimSuccess(bytes32 id, address claimer, uint claimed_value, address token_address)
        event RefundSuccess(bytes32 id, address token_address, uint remaining_balance)
    ]"#
);

abigen!(
    Erc20Token,
    r#"[
        function approve(address spender, uint256 amount) returns (bool)
    ]"#
);
